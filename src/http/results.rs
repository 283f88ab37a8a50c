use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{parse_assessment_type, with_db, ApiError, AppState};
use crate::calc;

fn require_rfid(params: &HashMap<String, String>) -> Result<String, ApiError> {
    params
        .get("rfid")
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ApiError::bad_params("rfid parameter is required"))
}

pub(crate) async fn monthly(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let rfid = require_rfid(&params)?;
    let groups = with_db(&state, move |conn| {
        calc::student_monthly_results(conn, &rfid)
    })
    .await?;
    Ok(Json(json!({ "assessments": groups })))
}

pub(crate) async fn by_type(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let rfid = require_rfid(&params)?;
    let assessment_type = parse_assessment_type(
        params
            .get("assessment_type")
            .ok_or_else(|| ApiError::bad_params("assessment_type parameter is required"))?,
    )?;

    let groups = with_db(&state, move |conn| {
        calc::student_results_by_type(conn, &rfid, assessment_type.as_str())
    })
    .await?;
    Ok(Json(json!({ "assessments": groups })))
}
