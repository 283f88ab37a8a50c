mod assessments;
mod error;
mod marks;
mod reports;
mod results;

pub use error::ApiError;

use axum::routing::{get, post};
use axum::Router;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::calc::OpError;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub report_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/assessments",
            post(assessments::create).get(assessments::list),
        )
        .route("/api/assessment-types", get(assessments::types))
        .route("/api/assessment-marks", get(marks::assessment_marks))
        .route("/api/assessment-students", get(marks::assessment_students))
        .route("/api/submit-marks", post(marks::submit))
        .route("/api/reports/generate", post(reports::generate_json))
        .route("/api/student-results/monthly", get(results::monthly))
        .route("/api/student-results", get(results::by_type))
        .route("/assessment-report", post(reports::assessment_report))
        .route("/all-subjects-assessments", post(reports::all_subjects))
        .route(
            "/all-monthlies-with-quizzes",
            post(reports::monthlies_with_quizzes),
        )
        .route("/subject-report", post(reports::subject_report))
        .route("/download-report/:filename", get(reports::download))
        .with_state(state)
}

/// Runs a unit of work against a request-scoped connection on the blocking
/// pool. The connection is opened per request and dropped when the closure
/// returns.
pub(crate) async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, OpError> + Send + 'static,
{
    let data_dir = state.data_dir.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<T, OpError> {
        let mut conn =
            db::open_db(&data_dir).map_err(|e| OpError::new("db_open_failed", e.to_string()))?;
        f(&mut conn)
    })
    .await;

    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(format!("worker task failed: {e}"))),
    }
}

/// Same as `with_db`, bounded by the configured report timeout. Workbook
/// generation has no cancellation point, so an expired request keeps
/// running on the blocking pool but the caller gets a timely answer.
pub(crate) async fn with_db_timeout<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, OpError> + Send + 'static,
{
    let timeout = state.report_timeout;
    match tokio::time::timeout(timeout, with_db(state, f)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "report generation timed out");
            Err(ApiError::new(
                "report_timeout",
                "report generation timed out",
            ))
        }
    }
}

pub(crate) fn require_i64(body: &serde_json::Value, field: &str) -> Result<i64, ApiError> {
    body.get(field)
        .ok_or_else(|| ApiError::bad_params(format!("missing required field: {field}")))?
        .as_i64()
        .ok_or_else(|| ApiError::bad_params(format!("{field} must be an integer")))
}

pub(crate) fn require_str<'a>(
    body: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ApiError> {
    body.get(field)
        .ok_or_else(|| ApiError::bad_params(format!("missing required field: {field}")))?
        .as_str()
        .ok_or_else(|| ApiError::bad_params(format!("{field} must be a string")))
}

pub(crate) fn parse_assessment_type(raw: &str) -> Result<crate::assess::AssessmentType, ApiError> {
    crate::assess::AssessmentType::parse(raw)
        .ok_or_else(|| ApiError::new("invalid_type", format!("invalid assessment type: {raw}")))
}

pub(crate) fn parse_grading(body: &serde_json::Value) -> Result<crate::grade::GradePolicy, ApiError> {
    match body.get("grading") {
        None => Ok(crate::grade::GradePolicy::default()),
        Some(v) if v.is_null() => Ok(crate::grade::GradePolicy::default()),
        Some(v) => {
            let raw = v
                .as_str()
                .ok_or_else(|| ApiError::bad_params("grading must be a string"))?;
            crate::grade::GradePolicy::parse(raw)
                .ok_or_else(|| ApiError::bad_params("grading must be one of: coarse, fine"))
        }
    }
}
