use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use campusd::assess::{create_assessment, NewAssessment};
use campusd::db;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seed_subject(conn: &Connection) -> i64 {
    conn.execute(
        "INSERT INTO teachers(teacher_name) VALUES('Ms. Khan')",
        [],
    )
    .expect("insert teacher");
    conn.execute(
        "INSERT INTO subjects(subject_name, teacher_id, campus_id, year) VALUES('Maths', 1, 1, 1)",
        [],
    )
    .expect("insert subject");
    conn.last_insert_rowid()
}

fn new_assessment(subject_id: i64, assessment_type: &str, created_at: &str) -> NewAssessment {
    NewAssessment {
        subject_id,
        assessment_type: assessment_type.to_string(),
        total_marks: 100.0,
        grading_criteria: json!({ "scheme": "default" }),
        created_at: created_at.to_string(),
    }
}

#[test]
fn sequences_start_at_the_type_base_and_increase() {
    let workspace = temp_dir("campusd-sequence");
    let mut conn = db::open_db(&workspace).expect("open db");
    let subject_id = seed_subject(&conn);

    let monthly = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Monthly", "2026-01-10T09:00"),
    )
    .expect("first monthly");
    assert_eq!(monthly.sequence, 101);
    assert_eq!(monthly.title, "Monthly 1");

    let send_up = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Send Up", "2026-01-12T09:00"),
    )
    .expect("first send up");
    assert_eq!(send_up.sequence, 151);
    assert_eq!(send_up.title, "Send Up 1");

    let weekly = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Weekly", "2026-01-13T09:00"),
    )
    .expect("first weekly");
    assert_eq!(weekly.sequence, 1);
    assert_eq!(weekly.title, "Weekly 1");

    let weekly2 = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Weekly", "2026-01-20T09:00"),
    )
    .expect("second weekly");
    assert_eq!(weekly2.sequence, 2);
}

#[test]
fn duplicate_period_rejected_next_month_allowed() {
    let workspace = temp_dir("campusd-duplicate-period");
    let mut conn = db::open_db(&workspace).expect("open db");
    let subject_id = seed_subject(&conn);

    let first = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Monthly", "2026-03-05T09:30"),
    )
    .expect("first monthly");
    assert_eq!(first.sequence, 101);

    let err = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Monthly", "2026-03-25T14:00"),
    )
    .expect_err("second monthly in the same month");
    assert_eq!(err.code, "duplicate_period");

    let next_month = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Monthly", "2026-04-02T09:30"),
    )
    .expect("monthly next month");
    assert_eq!(next_month.sequence, 102);
    assert_eq!(next_month.title, "Monthly 2");

    // Send Up is capped independently of Monthly.
    let send_up = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Send Up", "2026-03-09T09:30"),
    )
    .expect("send up in march");
    assert_eq!(send_up.sequence, 151);
    let err = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Send Up", "2026-03-30T09:30"),
    )
    .expect_err("second send up in march");
    assert_eq!(err.code, "duplicate_period");
}

#[test]
fn invalid_type_and_unowned_subject_are_rejected() {
    let workspace = temp_dir("campusd-create-validation");
    let mut conn = db::open_db(&workspace).expect("open db");
    let subject_id = seed_subject(&conn);

    let err = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Send-Up", "2026-03-05T09:30"),
    )
    .expect_err("hyphenated spelling is not a valid type");
    assert_eq!(err.code, "invalid_type");

    let err = create_assessment(
        &mut conn,
        &new_assessment(999, "Monthly", "2026-03-05T09:30"),
    )
    .expect_err("unknown subject");
    assert_eq!(err.code, "not_found");

    conn.execute(
        "INSERT INTO subjects(subject_name, teacher_id, campus_id, year)
         VALUES('Orphaned', NULL, 1, 1)",
        [],
    )
    .expect("insert subject without teacher");
    let orphan_id = conn.last_insert_rowid();
    let err = create_assessment(
        &mut conn,
        &new_assessment(orphan_id, "Monthly", "2026-03-05T09:30"),
    )
    .expect_err("subject without a teacher");
    assert_eq!(err.code, "not_found");

    let err = create_assessment(
        &mut conn,
        &new_assessment(subject_id, "Monthly", "05-03-2026 09:30"),
    )
    .expect_err("malformed created_at");
    assert_eq!(err.code, "bad_params");

    // Nothing above should have left partial rows behind.
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM assessments", [], |r| r.get(0))
        .expect("count assessments");
    assert_eq!(count, 0);
}
