use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

use super::{with_db, ApiError, AppState};
use crate::calc::{self, MarkEntry};

fn target_params(params: &HashMap<String, String>) -> Result<(i64, bool), ApiError> {
    let target_id: i64 = params
        .get("assessment_id")
        .ok_or_else(|| ApiError::bad_params("assessment_id parameter is required"))?
        .parse()
        .map_err(|_| ApiError::bad_params("assessment_id must be an integer"))?;
    let is_quiz = params
        .get("is_quiz")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    Ok((target_id, is_quiz))
}

pub(crate) async fn assessment_marks(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let (target_id, is_quiz) = target_params(&params)?;

    if is_quiz {
        let view = with_db(&state, move |conn| calc::quiz_marks(conn, target_id)).await?;
        Ok(Json(json!({
            "assessment_details": view.assessment_details,
            "students": view.students,
        })))
    } else {
        let view = with_db(&state, move |conn| calc::assessment_marks(conn, target_id)).await?;
        Ok(Json(json!({
            "assessment_details": view.assessment_details,
            "students": view.students,
        })))
    }
}

pub(crate) async fn assessment_students(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let (target_id, is_quiz) = target_params(&params)?;

    let view = with_db(&state, move |conn| {
        if is_quiz {
            calc::quiz_students(conn, target_id)
        } else {
            calc::assessment_students(conn, target_id)
        }
    })
    .await?;

    Ok(Json(json!({
        "total_marks": view.total_marks,
        "students": view.students,
    })))
}

pub(crate) async fn submit(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    for field in ["assessment_id", "marks", "is_quiz"] {
        if body.get(field).is_none() {
            return Err(ApiError::bad_params(format!(
                "missing required field: {field}"
            )));
        }
    }

    let target_id = body
        .get("assessment_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ApiError::bad_params("assessment_id must be an integer"))?;
    let is_quiz = body
        .get("is_quiz")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ApiError::bad_params("is_quiz must be a boolean"))?;
    let marks = body
        .get("marks")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ApiError::bad_params("marks must be an array"))?;

    let mut entries = Vec::with_capacity(marks.len());
    for (i, mark) in marks.iter().enumerate() {
        let rfid = mark
            .get("rfid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::bad_params(format!("marks[{i}] is missing rfid")))?;
        let marks_achieved = mark
            .get("marks_achieved")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                ApiError::bad_params(format!("marks[{i}] is missing numeric marks_achieved"))
            })?;
        entries.push(MarkEntry {
            rfid: rfid.to_string(),
            marks_achieved,
        });
    }

    let submitted = with_db(&state, move |conn| {
        calc::submit_marks(conn, target_id, &entries, is_quiz)
    })
    .await?;
    info!(target_id, submitted, is_quiz, "marks submitted");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Marks submitted successfully",
            "submitted": submitted,
        })),
    ))
}
