use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::calc::OpError;
use crate::db;

pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentType {
    Monthly,
    SendUp,
    Mocks,
    Other,
    TestSession,
    Weekly,
    HalfBook,
    FullBook,
}

impl AssessmentType {
    pub const ALL: [AssessmentType; 8] = [
        AssessmentType::Monthly,
        AssessmentType::SendUp,
        AssessmentType::Mocks,
        AssessmentType::Other,
        AssessmentType::TestSession,
        AssessmentType::Weekly,
        AssessmentType::HalfBook,
        AssessmentType::FullBook,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Monthly" => Some(AssessmentType::Monthly),
            "Send Up" => Some(AssessmentType::SendUp),
            "Mocks" => Some(AssessmentType::Mocks),
            "Other" => Some(AssessmentType::Other),
            "Test Session" => Some(AssessmentType::TestSession),
            "Weekly" => Some(AssessmentType::Weekly),
            "Half Book" => Some(AssessmentType::HalfBook),
            "Full Book" => Some(AssessmentType::FullBook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentType::Monthly => "Monthly",
            AssessmentType::SendUp => "Send Up",
            AssessmentType::Mocks => "Mocks",
            AssessmentType::Other => "Other",
            AssessmentType::TestSession => "Test Session",
            AssessmentType::Weekly => "Weekly",
            AssessmentType::HalfBook => "Half Book",
            AssessmentType::FullBook => "Full Book",
        }
    }

    /// Numbering band reserved for the type; display ordinals are relative
    /// to this base.
    pub fn sequence_base(self) -> i64 {
        match self {
            AssessmentType::Monthly => 100,
            AssessmentType::SendUp => 150,
            _ => 0,
        }
    }

    /// Monthly and Send Up are capped at one instance per subject per
    /// calendar month.
    pub fn once_per_month(self) -> bool {
        matches!(self, AssessmentType::Monthly | AssessmentType::SendUp)
    }
}

pub fn sequence_base_of(raw: &str) -> i64 {
    AssessmentType::parse(raw)
        .map(|t| t.sequence_base())
        .unwrap_or(0)
}

/// Human-facing title: `"{type} {sequence - base}"`, an ordinal starting at 1.
pub fn display_title(assessment_type: &str, sequence: i64) -> String {
    format!(
        "{} {}",
        assessment_type,
        sequence - sequence_base_of(assessment_type)
    )
}

pub fn parse_created_at(raw: &str) -> Result<NaiveDateTime, OpError> {
    NaiveDateTime::parse_from_str(raw, CREATED_AT_FORMAT).map_err(|_| {
        OpError::new(
            "bad_params",
            format!("created_at must be formatted as YYYY-MM-DDTHH:MM, got {raw}"),
        )
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAssessment {
    pub subject_id: i64,
    pub assessment_type: String,
    pub total_marks: f64,
    pub grading_criteria: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedAssessment {
    pub assessment_id: i64,
    pub sequence: i64,
    pub title: String,
}

/// Composite create: teacher lookup, duplicate-period guard, sequence
/// allocation, assessment insert, and the Monthly quiz fan-out all run in
/// one transaction. The sequence is re-derived inside the transaction so
/// concurrent creates for the same (subject, type) cannot collide.
pub fn create_assessment(
    conn: &mut Connection,
    req: &NewAssessment,
) -> Result<CreatedAssessment, OpError> {
    let ty = AssessmentType::parse(&req.assessment_type).ok_or_else(|| {
        OpError::new(
            "invalid_type",
            format!("invalid assessment type: {}", req.assessment_type),
        )
    })?;
    if req.total_marks < 0.0 {
        return Err(OpError::new("bad_params", "total_marks must be >= 0"));
    }
    let created_at = parse_created_at(&req.created_at)?;
    let month_key = created_at.format("%Y-%m").to_string();

    db::with_tx(conn, |tx| {
        let teacher_id: Option<Option<i64>> = tx
            .query_row(
                "SELECT teacher_id FROM subjects WHERE subject_id = ?",
                [req.subject_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(Some(teacher_id)) = teacher_id else {
            return Err(OpError::new(
                "not_found",
                "subject not found or teacher not assigned",
            ));
        };

        if ty.once_per_month() {
            let existing: i64 = tx.query_row(
                "SELECT COUNT(*) FROM assessments
                 WHERE subject_id = ? AND assessment_type = ?
                   AND substr(created_at, 1, 7) = ?",
                (req.subject_id, ty.as_str(), &month_key),
                |r| r.get(0),
            )?;
            if existing >= 1 {
                return Err(OpError::new(
                    "duplicate_period",
                    format!(
                        "an assessment of type {} already exists this month",
                        ty.as_str()
                    ),
                ));
            }
        }

        let last_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), ? - 1) FROM assessments
             WHERE subject_id = ? AND assessment_type = ?",
            (ty.sequence_base(), req.subject_id, ty.as_str()),
            |r| r.get(0),
        )?;
        let sequence = last_sequence + 1;

        tx.execute(
            "INSERT INTO assessments
             (subject_id, teacher_id, assessment_type, total_marks,
              grading_criteria, sequence, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                req.subject_id,
                teacher_id,
                ty.as_str(),
                req.total_marks,
                req.grading_criteria.to_string(),
                sequence,
                &req.created_at,
            ),
        )?;
        let assessment_id = tx.last_insert_rowid();

        if ty == AssessmentType::Monthly {
            for quiz_number in 1..=3 {
                tx.execute(
                    "INSERT INTO quizzes
                     (monthly_assessment_id, quiz_number, subject_id, created_at)
                     VALUES(?, ?, ?, ?)",
                    (assessment_id, quiz_number, req.subject_id, &req.created_at),
                )?;
            }
        }

        Ok(CreatedAssessment {
            assessment_id,
            sequence,
            title: display_title(ty.as_str(), sequence),
        })
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentSummary {
    pub id: i64,
    pub assessment_type: String,
    pub created_at: String,
    pub total_marks: f64,
    pub sequence: i64,
    pub is_marked: bool,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSummary {
    pub quiz_id: i64,
    pub quiz_number: i64,
    pub created_at: String,
    pub total_marks: Option<f64>,
    pub is_marked: bool,
    pub monthly_assessment_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectAssessments {
    pub assessments: Vec<AssessmentSummary>,
    pub quizzes: Vec<QuizSummary>,
}

pub fn list_for_subject(
    conn: &Connection,
    subject_id: i64,
) -> Result<SubjectAssessments, OpError> {
    let mut assess_stmt = conn.prepare(
        "SELECT a.assessment_id, a.assessment_type, a.created_at,
                a.total_marks, a.sequence, COUNT(am.rfid) > 0
         FROM assessments a
         LEFT JOIN assessment_marks am ON a.assessment_id = am.assessment_id
         WHERE a.subject_id = ?
         GROUP BY a.assessment_id
         ORDER BY a.created_at DESC, a.assessment_id DESC",
    )?;
    let assessments = assess_stmt
        .query_map([subject_id], |r| {
            let assessment_type: String = r.get(1)?;
            let sequence: i64 = r.get(4)?;
            Ok(AssessmentSummary {
                id: r.get(0)?,
                title: display_title(&assessment_type, sequence),
                assessment_type,
                created_at: r.get(2)?,
                total_marks: r.get(3)?,
                sequence,
                is_marked: r.get::<_, i64>(5)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut quiz_stmt = conn.prepare(
        "SELECT q.quiz_id, q.quiz_number, q.created_at, q.total_marks,
                a.assessment_type, a.sequence, COUNT(qm.rfid) > 0
         FROM quizzes q
         JOIN assessments a ON q.monthly_assessment_id = a.assessment_id
         LEFT JOIN quiz_marks qm ON q.quiz_id = qm.quiz_id
         WHERE q.subject_id = ?
         GROUP BY q.quiz_id
         ORDER BY q.created_at DESC, q.quiz_id DESC",
    )?;
    let quizzes = quiz_stmt
        .query_map([subject_id], |r| {
            let assessment_type: String = r.get(4)?;
            let sequence: i64 = r.get(5)?;
            Ok(QuizSummary {
                quiz_id: r.get(0)?,
                quiz_number: r.get(1)?,
                created_at: r.get(2)?,
                total_marks: r.get(3)?,
                is_marked: r.get::<_, i64>(6)? != 0,
                monthly_assessment_title: display_title(&assessment_type, sequence),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(SubjectAssessments {
        assessments,
        quizzes,
    })
}

pub fn distinct_types(conn: &Connection) -> Result<Vec<String>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT assessment_type FROM assessments ORDER BY assessment_type",
    )?;
    let types = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(types)
}
