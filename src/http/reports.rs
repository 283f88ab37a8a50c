use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::info;

use super::{
    parse_assessment_type, parse_grading, require_i64, require_str, with_db, with_db_timeout,
    ApiError, AppState,
};
use crate::reports::{self, GeneratedReport};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn workbook_response(report: GeneratedReport) -> Response {
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report.file_name),
            ),
        ],
        report.bytes,
    )
        .into_response()
}

pub(crate) async fn generate_json(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<reports::JsonReport>, ApiError> {
    let subject_id = require_i64(&body, "subject_id")?;
    let assessment_type = parse_assessment_type(require_str(&body, "assessment_type")?)?;
    let policy = parse_grading(&body)?;

    let report = with_db(&state, move |conn| {
        reports::subject_json_report(conn, subject_id, assessment_type, policy)
    })
    .await?;
    Ok(Json(report))
}

pub(crate) async fn assessment_report(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let campus_id = require_i64(&body, "campus_id")?;
    let subject_id = require_i64(&body, "subject_id")?;
    let assessment_type = parse_assessment_type(require_str(&body, "assessment_type")?)?;
    let policy = parse_grading(&body)?;

    let reports_dir = state.reports_dir.clone();
    let report = with_db_timeout(&state, move |conn| {
        let sheet =
            reports::assessment_report_sheet(conn, campus_id, subject_id, assessment_type, policy)?;
        reports::persist_workbook(
            conn,
            &reports_dir,
            "assessment-report",
            &format!("s{}_{}", subject_id, assessment_type.as_str()),
            "Assessments",
            &sheet,
        )
    })
    .await?;
    info!(file = %report.file_name, sha256 = %report.sha256, "workbook generated");
    Ok(workbook_response(report))
}

pub(crate) async fn all_subjects(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let campus_id = require_i64(&body, "campus_id")?;
    let year = require_i64(&body, "year")?;
    let assessment_type = parse_assessment_type(require_str(&body, "assessment_type")?)?;
    let policy = parse_grading(&body)?;

    let reports_dir = state.reports_dir.clone();
    let report = with_db_timeout(&state, move |conn| {
        let sheet =
            reports::all_subjects_sheet(conn, campus_id, year, assessment_type, policy)?;
        reports::persist_workbook(
            conn,
            &reports_dir,
            "all-subjects-assessments",
            &format!("c{}_y{}_{}", campus_id, year, assessment_type.as_str()),
            "All Assessments",
            &sheet,
        )
    })
    .await?;
    info!(file = %report.file_name, sha256 = %report.sha256, "workbook generated");
    Ok(workbook_response(report))
}

pub(crate) async fn monthlies_with_quizzes(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let campus_id = require_i64(&body, "campus_id")?;
    let year = require_i64(&body, "year")?;
    let policy = parse_grading(&body)?;

    let reports_dir = state.reports_dir.clone();
    let report = with_db_timeout(&state, move |conn| {
        let sheet = reports::monthlies_with_quizzes_sheet(conn, campus_id, year, policy)?;
        reports::persist_workbook(
            conn,
            &reports_dir,
            "all-monthlies-with-quizzes",
            &format!("c{}_y{}", campus_id, year),
            "Monthlies",
            &sheet,
        )
    })
    .await?;
    info!(file = %report.file_name, sha256 = %report.sha256, "workbook generated");
    Ok(workbook_response(report))
}

pub(crate) async fn subject_report(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let campus_id = require_i64(&body, "campus_id")?;
    let subject_id = require_i64(&body, "subject_id")?;
    let policy = parse_grading(&body)?;

    let reports_dir = state.reports_dir.clone();
    let report = with_db_timeout(&state, move |conn| {
        let sheet = reports::subject_report_sheet(conn, campus_id, subject_id, policy)?;
        reports::persist_workbook(
            conn,
            &reports_dir,
            "subject-report",
            &format!("s{subject_id}"),
            "Subject Report",
            &sheet,
        )
    })
    .await?;
    info!(file = %report.file_name, sha256 = %report.sha256, "workbook generated");
    Ok(workbook_response(report))
}

pub(crate) async fn download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let path = reports::resolve_download(&state.reports_dir, &file_name)?;
    let bytes = tokio::task::spawn_blocking(move || std::fs::read(&path))
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(|_| ApiError::not_found("report not found"))?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
