use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::assess::{self, parse_created_at};
use crate::db;
use crate::grade::GradePolicy;

#[derive(Debug, Clone, Serialize)]
pub struct OpError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OpError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for OpError {}

impl From<rusqlite::Error> for OpError {
    fn from(e: rusqlite::Error) -> Self {
        OpError::new("db_query_failed", e.to_string())
    }
}

/// Guarded percentage: a zero or missing total yields 0, never a fault.
pub fn percentage(obtained: f64, total: f64) -> f64 {
    if total > 0.0 {
        obtained / total * 100.0
    } else {
        0.0
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedMark {
    pub student_name: String,
    pub student_id: String,
    pub rfid: String,
    pub marks_achieved: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentDetails {
    pub assessment_id: i64,
    pub assessment_type: String,
    pub created_at: String,
    pub total_marks: f64,
    pub sequence: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizDetails {
    pub quiz_id: i64,
    pub quiz_number: i64,
    pub created_at: String,
    pub total_marks: Option<f64>,
    pub monthly_assessment_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentMarksView {
    pub assessment_details: AssessmentDetails,
    pub students: Vec<SubmittedMark>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizMarksView {
    pub assessment_details: QuizDetails,
    pub students: Vec<SubmittedMark>,
}

pub fn assessment_marks(
    conn: &Connection,
    assessment_id: i64,
) -> Result<AssessmentMarksView, OpError> {
    let details = conn
        .query_row(
            "SELECT assessment_id, assessment_type, created_at, total_marks, sequence
             FROM assessments WHERE assessment_id = ?",
            [assessment_id],
            |r| {
                let assessment_type: String = r.get(1)?;
                let sequence: i64 = r.get(4)?;
                Ok(AssessmentDetails {
                    assessment_id: r.get(0)?,
                    title: assess::display_title(&assessment_type, sequence),
                    assessment_type,
                    created_at: r.get(2)?,
                    total_marks: r.get(3)?,
                    sequence,
                })
            },
        )
        .optional()?
        .ok_or_else(|| OpError::new("not_found", "assessment not found"))?;

    let mut stmt = conn.prepare(
        "SELECT s.student_name, s.student_id, am.rfid, am.marks_achieved
         FROM assessment_marks am
         JOIN students s ON am.rfid = s.rfid
         WHERE am.assessment_id = ?
         ORDER BY s.student_name",
    )?;
    let students = stmt
        .query_map([assessment_id], |r| {
            Ok(SubmittedMark {
                student_name: r.get(0)?,
                student_id: r.get(1)?,
                rfid: r.get(2)?,
                marks_achieved: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(AssessmentMarksView {
        assessment_details: details,
        students,
    })
}

pub fn quiz_marks(conn: &Connection, quiz_id: i64) -> Result<QuizMarksView, OpError> {
    let details = conn
        .query_row(
            "SELECT q.quiz_id, q.quiz_number, q.created_at, q.total_marks,
                    a.assessment_type, a.sequence
             FROM quizzes q
             JOIN assessments a ON q.monthly_assessment_id = a.assessment_id
             WHERE q.quiz_id = ?",
            [quiz_id],
            |r| {
                let assessment_type: String = r.get(4)?;
                let sequence: i64 = r.get(5)?;
                Ok(QuizDetails {
                    quiz_id: r.get(0)?,
                    quiz_number: r.get(1)?,
                    created_at: r.get(2)?,
                    total_marks: r.get(3)?,
                    monthly_assessment_title: assess::display_title(&assessment_type, sequence),
                })
            },
        )
        .optional()?
        .ok_or_else(|| OpError::new("not_found", "quiz not found"))?;

    let mut stmt = conn.prepare(
        "SELECT s.student_name, s.student_id, qm.rfid, qm.marks_achieved
         FROM quiz_marks qm
         JOIN students s ON qm.rfid = s.rfid
         WHERE qm.quiz_id = ?
         ORDER BY s.student_name",
    )?;
    let students = stmt
        .query_map([quiz_id], |r| {
            Ok(SubmittedMark {
                student_name: r.get(0)?,
                student_id: r.get(1)?,
                rfid: r.get(2)?,
                marks_achieved: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(QuizMarksView {
        assessment_details: details,
        students,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibleStudent {
    pub rfid: String,
    pub student_name: String,
    pub student_id: String,
    pub marks_achieved: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibleStudentsView {
    pub total_marks: Option<f64>,
    pub students: Vec<EligibleStudent>,
}

/// Every student enrolled in the assessment's subject, left-joined with
/// their mark. Students without a submitted mark come back with a null mark.
pub fn assessment_students(
    conn: &Connection,
    assessment_id: i64,
) -> Result<EligibleStudentsView, OpError> {
    let total_marks: f64 = conn
        .query_row(
            "SELECT total_marks FROM assessments WHERE assessment_id = ?",
            [assessment_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| OpError::new("not_found", "assessment not found"))?;

    let mut stmt = conn.prepare(
        "SELECT s.rfid, s.student_name, s.student_id, am.marks_achieved
         FROM students s
         JOIN enrollments se ON s.rfid = se.rfid
         JOIN assessments a ON se.subject_id = a.subject_id
         LEFT JOIN assessment_marks am
                ON am.assessment_id = a.assessment_id AND am.rfid = s.rfid
         WHERE a.assessment_id = ?
         ORDER BY s.student_name",
    )?;
    let students = stmt
        .query_map([assessment_id], |r| {
            Ok(EligibleStudent {
                rfid: r.get(0)?,
                student_name: r.get(1)?,
                student_id: r.get(2)?,
                marks_achieved: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(EligibleStudentsView {
        total_marks: Some(total_marks),
        students,
    })
}

pub fn quiz_students(conn: &Connection, quiz_id: i64) -> Result<EligibleStudentsView, OpError> {
    let total_marks: Option<f64> = conn
        .query_row(
            "SELECT total_marks FROM quizzes WHERE quiz_id = ?",
            [quiz_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| OpError::new("not_found", "quiz not found"))?;

    let mut stmt = conn.prepare(
        "SELECT s.rfid, s.student_name, s.student_id, qm.marks_achieved
         FROM students s
         JOIN enrollments se ON s.rfid = se.rfid
         JOIN quizzes q ON se.subject_id = q.subject_id
         LEFT JOIN quiz_marks qm ON qm.quiz_id = q.quiz_id AND qm.rfid = s.rfid
         WHERE q.quiz_id = ?
         ORDER BY s.student_name",
    )?;
    let students = stmt
        .query_map([quiz_id], |r| {
            Ok(EligibleStudent {
                rfid: r.get(0)?,
                student_name: r.get(1)?,
                student_id: r.get(2)?,
                marks_achieved: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(EligibleStudentsView {
        total_marks,
        students,
    })
}

#[derive(Debug, Clone)]
pub struct MarkEntry {
    pub rfid: String,
    pub marks_achieved: f64,
}

/// Batch upsert, one transaction: either every entry commits or none do.
/// Resubmitting a (target, rfid) pair updates the existing row in place.
pub fn submit_marks(
    conn: &mut Connection,
    target_id: i64,
    entries: &[MarkEntry],
    is_quiz: bool,
) -> Result<usize, OpError> {
    for entry in entries {
        if entry.rfid.trim().is_empty() {
            return Err(OpError::new("bad_params", "mark entry is missing rfid"));
        }
        if entry.marks_achieved < 0.0 {
            return Err(OpError::new("bad_params", "negative marks are not allowed")
                .with_details(serde_json::json!({ "rfid": entry.rfid })));
        }
    }

    let exists_sql = if is_quiz {
        "SELECT 1 FROM quizzes WHERE quiz_id = ?"
    } else {
        "SELECT 1 FROM assessments WHERE assessment_id = ?"
    };
    let exists: Option<i64> = conn
        .query_row(exists_sql, [target_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(OpError::new("not_found", "assessment not found"));
    }

    db::with_tx(conn, |tx| {
        for entry in entries {
            let mark_id = Uuid::new_v4().to_string();
            if is_quiz {
                tx.execute(
                    "INSERT INTO quiz_marks(id, quiz_id, rfid, marks_achieved)
                     VALUES(?, ?, ?, ?)
                     ON CONFLICT(quiz_id, rfid) DO UPDATE SET
                       marks_achieved = excluded.marks_achieved",
                    (&mark_id, target_id, &entry.rfid, entry.marks_achieved),
                )?;
            } else {
                tx.execute(
                    "INSERT INTO assessment_marks(id, assessment_id, rfid, marks_achieved)
                     VALUES(?, ?, ?, ?)
                     ON CONFLICT(assessment_id, rfid) DO UPDATE SET
                       marks_achieved = excluded.marks_achieved",
                    (&mark_id, target_id, &entry.rfid, entry.marks_achieved),
                )?;
            }
        }
        Ok(entries.len())
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedRow {
    pub student_name: String,
    pub rfid: String,
    pub marks_achieved: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub grade: &'static str,
}

/// Graded rows for one assessment, scoped to a campus. A mark row's own
/// total wins; otherwise the assessment's nominal total is the fallback.
pub fn graded_assessment_rows(
    conn: &Connection,
    assessment_id: i64,
    campus_id: i64,
    fallback_total: f64,
    policy: GradePolicy,
) -> Result<Vec<GradedRow>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT s.student_name, s.rfid, am.marks_achieved, am.total_marks
         FROM assessment_marks am
         JOIN students s ON s.rfid = am.rfid
         WHERE am.assessment_id = ? AND s.campus_id = ?
         ORDER BY s.student_name",
    )?;
    let raw = stmt
        .query_map((assessment_id, campus_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let rows = raw
        .into_iter()
        .map(|(student_name, rfid, obtained, row_total)| {
            let total = row_total.filter(|t| *t > 0.0).unwrap_or(fallback_total);
            let pct = round2(percentage(obtained, total));
            GradedRow {
                student_name,
                rfid,
                marks_achieved: obtained,
                total_marks: total.max(0.0),
                percentage: pct,
                grade: policy.grade(pct),
            }
        })
        .collect();
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyQuizRow {
    pub student_name: String,
    pub rfid: String,
    pub monthly_marks: f64,
    pub quiz_marks: Vec<f64>,
    pub obtained: f64,
    pub out_of: f64,
    pub percentage: f64,
    pub grade: &'static str,
}

/// Composite rows for one Monthly assessment and its quizzes. The composite
/// score is `monthly + mean(quiz marks)` out of `monthly total + quiz 1
/// total`; missing quiz submissions count as 0, and a zero denominator
/// collapses the percentage to 0.
pub fn monthly_with_quiz_rows(
    conn: &Connection,
    assessment_id: i64,
    campus_id: i64,
    policy: GradePolicy,
) -> Result<Vec<MonthlyQuizRow>, OpError> {
    let monthly_total: f64 = conn
        .query_row(
            "SELECT total_marks FROM assessments
             WHERE assessment_id = ? AND assessment_type = 'Monthly'",
            [assessment_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| OpError::new("not_found", "monthly assessment not found"))?;

    let mut quiz_stmt = conn.prepare(
        "SELECT quiz_id, quiz_number, total_marks FROM quizzes
         WHERE monthly_assessment_id = ?
         ORDER BY quiz_number",
    )?;
    let quizzes: Vec<(i64, i64, Option<f64>)> = quiz_stmt
        .query_map([assessment_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut marks_stmt = conn.prepare(
        "SELECT s.student_name, s.rfid, am.marks_achieved
         FROM assessment_marks am
         JOIN students s ON s.rfid = am.rfid
         WHERE am.assessment_id = ? AND s.campus_id = ?
         ORDER BY s.student_name",
    )?;
    let monthly_rows: Vec<(String, String, f64)> = marks_stmt
        .query_map((assessment_id, campus_id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut quiz_mark_by_pair: HashMap<(i64, String), f64> = HashMap::new();
    if !quizzes.is_empty() && !monthly_rows.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(quizzes.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT quiz_id, rfid, marks_achieved FROM quiz_marks WHERE quiz_id IN ({})",
            placeholders
        );
        let bind_values: Vec<Value> = quizzes.iter().map(|(id, _, _)| Value::Integer(*id)).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind_values), |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (quiz_id, rfid, marks) = row?;
            quiz_mark_by_pair.insert((quiz_id, rfid), marks);
        }
    }

    let first_quiz_total = quizzes
        .first()
        .and_then(|(_, _, total)| *total)
        .unwrap_or(0.0);
    let out_of = monthly_total + first_quiz_total;

    let rows = monthly_rows
        .into_iter()
        .map(|(student_name, rfid, monthly_marks)| {
            let per_quiz: Vec<f64> = quizzes
                .iter()
                .map(|(quiz_id, _, _)| {
                    quiz_mark_by_pair
                        .get(&(*quiz_id, rfid.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();
            let quiz_mean = if per_quiz.is_empty() {
                0.0
            } else {
                per_quiz.iter().sum::<f64>() / per_quiz.len() as f64
            };
            let obtained = monthly_marks + quiz_mean;
            let pct = round2(percentage(obtained, out_of));
            MonthlyQuizRow {
                student_name,
                rfid,
                monthly_marks,
                quiz_marks: per_quiz,
                obtained: round2(obtained),
                out_of,
                percentage: pct,
                grade: policy.grade(pct),
            }
        })
        .collect();
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub student_name: String,
    pub student_id: String,
    pub marks_achieved: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub grade: &'static str,
}

/// Flat graded rows across every assessment of the given type in a subject.
pub fn subject_type_report(
    conn: &Connection,
    subject_id: i64,
    assessment_type: &str,
    policy: GradePolicy,
) -> Result<Vec<ReportEntry>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT s.student_name, s.student_id, am.marks_achieved, a.total_marks
         FROM assessment_marks am
         JOIN assessments a ON am.assessment_id = a.assessment_id
         JOIN students s ON am.rfid = s.rfid
         WHERE a.subject_id = ? AND a.assessment_type = ?
         ORDER BY s.student_name",
    )?;
    let raw = stmt
        .query_map((subject_id, assessment_type), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let rows = raw
        .into_iter()
        .map(|(student_name, student_id, obtained, total)| {
            let pct = round2(percentage(obtained, total));
            ReportEntry {
                student_name,
                student_id,
                marks_achieved: obtained,
                total_marks: total,
                percentage: pct,
                grade: policy.grade(pct),
            }
        })
        .collect();
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthGroup<T> {
    pub month_year: String,
    pub rows: Vec<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyResultRow {
    pub subject_name: String,
    pub quiz_number: Option<i64>,
    pub quiz_marks: f64,
    pub assessment_total: f64,
    pub assessment_marks: f64,
}

/// Per-student Monthly results: one row per (monthly, quiz) pair, grouped
/// by "Month Year", newest first.
pub fn student_monthly_results(
    conn: &Connection,
    rfid: &str,
) -> Result<Vec<MonthGroup<MonthlyResultRow>>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT sub.subject_name, q.quiz_number, qm.marks_achieved,
                a.total_marks, am.marks_achieved, a.created_at
         FROM assessments a
         JOIN assessment_marks am ON a.assessment_id = am.assessment_id
         LEFT JOIN quizzes q ON a.assessment_id = q.monthly_assessment_id
         LEFT JOIN quiz_marks qm ON q.quiz_id = qm.quiz_id AND qm.rfid = am.rfid
         JOIN subjects sub ON a.subject_id = sub.subject_id
         WHERE a.assessment_type = 'Monthly' AND am.rfid = ?
         ORDER BY a.created_at DESC, a.assessment_id DESC, q.quiz_number",
    )?;
    let raw = stmt
        .query_map([rfid], |r| {
            Ok((
                MonthlyResultRow {
                    subject_name: r.get(0)?,
                    quiz_number: r.get(1)?,
                    quiz_marks: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    assessment_total: r.get(3)?,
                    assessment_marks: r.get(4)?,
                },
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    group_by_month(raw)
}

#[derive(Debug, Clone, Serialize)]
pub struct TypedResultRow {
    pub subject_name: String,
    pub assessment_total: f64,
    pub assessment_marks: f64,
    pub sequence: i64,
}

pub fn student_results_by_type(
    conn: &Connection,
    rfid: &str,
    assessment_type: &str,
) -> Result<Vec<MonthGroup<TypedResultRow>>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT sub.subject_name, a.total_marks, am.marks_achieved,
                a.sequence, a.created_at
         FROM assessments a
         JOIN assessment_marks am ON a.assessment_id = am.assessment_id
         JOIN subjects sub ON a.subject_id = sub.subject_id
         WHERE a.assessment_type = ? AND am.rfid = ?
         ORDER BY a.created_at DESC, a.assessment_id DESC",
    )?;
    let raw = stmt
        .query_map((assessment_type, rfid), |r| {
            Ok((
                TypedResultRow {
                    subject_name: r.get(0)?,
                    assessment_total: r.get(1)?,
                    assessment_marks: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    sequence: r.get(3)?,
                },
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    group_by_month(raw)
}

fn group_by_month<T>(raw: Vec<(T, String)>) -> Result<Vec<MonthGroup<T>>, OpError> {
    let mut groups: Vec<MonthGroup<T>> = Vec::new();
    for (row, created_at) in raw {
        let month_year = parse_created_at(&created_at)?.format("%B %Y").to_string();
        match groups.last_mut() {
            Some(last) if last.month_year == month_year => last.rows.push(row),
            _ => groups.push(MonthGroup {
                month_year,
                rows: vec![row],
            }),
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_guards_zero_total() {
        assert_eq!(percentage(0.0, 0.0), 0.0);
        assert_eq!(percentage(10.0, 0.0), 0.0);
        assert_eq!(percentage(10.0, -5.0), 0.0);
        assert!((percentage(45.0, 60.0) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn round2_half_up() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn month_groups_merge_consecutive_rows() {
        let raw = vec![
            ("a", "2026-03-10T09:00".to_string()),
            ("b", "2026-03-02T09:00".to_string()),
            ("c", "2026-02-11T09:00".to_string()),
        ];
        let groups = group_by_month(raw).expect("group");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].month_year, "March 2026");
        assert_eq!(groups[0].rows, vec!["a", "b"]);
        assert_eq!(groups[1].month_year, "February 2026");
    }
}
