use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

use super::{require_i64, require_str, with_db, ApiError, AppState};
use crate::assess::{self, NewAssessment};

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    for field in [
        "subject_id",
        "assessment_type",
        "total_marks",
        "grading_criteria",
        "created_at",
    ] {
        if body.get(field).is_none() {
            return Err(ApiError::bad_params(format!(
                "missing required field: {field}"
            )));
        }
    }

    let req = NewAssessment {
        subject_id: require_i64(&body, "subject_id")?,
        assessment_type: require_str(&body, "assessment_type")?.to_string(),
        total_marks: body
            .get("total_marks")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ApiError::bad_params("total_marks must be a number"))?,
        grading_criteria: body.get("grading_criteria").cloned().unwrap_or(Value::Null),
        created_at: require_str(&body, "created_at")?.to_string(),
    };

    let created = with_db(&state, move |conn| assess::create_assessment(conn, &req)).await?;
    info!(
        assessment_id = created.assessment_id,
        title = %created.title,
        "assessment created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Assessment created successfully",
            "assessment_id": created.assessment_id,
            "sequence": created.sequence,
            "title": created.title,
        })),
    ))
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let subject_id: i64 = params
        .get("subject_id")
        .ok_or_else(|| ApiError::bad_params("subject_id parameter is required"))?
        .parse()
        .map_err(|_| ApiError::bad_params("subject_id must be an integer"))?;

    let listing = with_db(&state, move |conn| {
        assess::list_for_subject(conn, subject_id)
    })
    .await?;

    Ok(Json(json!({
        "assessments": listing.assessments,
        "quizzes": listing.quizzes,
    })))
}

pub(crate) async fn types(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let types = with_db(&state, |conn| assess::distinct_types(conn)).await?;
    Ok(Json(json!({ "assessment_types": types })))
}
