use rusqlite::Connection;
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use campusd::assess::{create_assessment, AssessmentType, NewAssessment};
use campusd::calc::{self, MarkEntry};
use campusd::db;
use campusd::grade::GradePolicy;
use campusd::reports;
use campusd::sheet::Cell;
use campusd::xlsx;

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

fn seed_students(conn: &Connection, subject_id: i64, count: usize) {
    for i in 0..count {
        let rfid = format!("RF-{:03}", i + 1);
        conn.execute(
            "INSERT INTO students(rfid, student_id, student_name, campus_id, year)
             VALUES(?, ?, ?, 1, 1)",
            (
                &rfid,
                format!("S-{:03}", i + 1),
                format!("Student {:03}", i + 1),
            ),
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO enrollments(subject_id, rfid) VALUES(?, ?)",
            (subject_id, &rfid),
        )
        .expect("enroll");
    }
}

fn seed_subject(conn: &Connection, name: &str) -> i64 {
    conn.execute(
        "INSERT INTO subjects(subject_name, teacher_id, campus_id, year) VALUES(?, 1, 1, 1)",
        [name],
    )
    .expect("insert subject");
    conn.last_insert_rowid()
}

fn setup(prefix: &str) -> (PathBuf, Connection, i64) {
    let workspace = temp_dir(prefix);
    let conn = db::open_db(&workspace).expect("open db");
    conn.execute("INSERT INTO teachers(teacher_name) VALUES('Ms. Tariq')", [])
        .expect("insert teacher");
    let subject_id = seed_subject(&conn, "Maths");
    seed_students(&conn, subject_id, 3);
    (workspace, conn, subject_id)
}

fn create_typed(
    conn: &mut Connection,
    subject_id: i64,
    assessment_type: &str,
    created_at: &str,
    total: f64,
) -> i64 {
    create_assessment(
        conn,
        &NewAssessment {
            subject_id,
            assessment_type: assessment_type.to_string(),
            total_marks: total,
            grading_criteria: json!(null),
            created_at: created_at.to_string(),
        },
    )
    .expect("create assessment")
    .assessment_id
}

fn submit_all(conn: &mut Connection, assessment_id: i64, values: &[(&str, f64)]) {
    let entries: Vec<MarkEntry> = values
        .iter()
        .map(|(rfid, marks)| MarkEntry {
            rfid: rfid.to_string(),
            marks_achieved: *marks,
        })
        .collect();
    calc::submit_marks(conn, assessment_id, &entries, false).expect("submit marks");
}

fn text_at(sheet: &campusd::sheet::Sheet, row: u32, col: u32) -> String {
    match sheet.get(row, col) {
        Some(Cell::Text(t)) => t.clone(),
        other => panic!("expected text at ({row},{col}), got {other:?}"),
    }
}

#[test]
fn single_assessment_report_stacks_blocks_with_fixed_offsets() {
    let (_workspace, mut conn, subject_id) = setup("campusd-variant1");

    let first = create_typed(&mut conn, subject_id, "Weekly", "2026-03-02T09:00", 20.0);
    let second = create_typed(&mut conn, subject_id, "Weekly", "2026-03-09T09:00", 20.0);
    submit_all(
        &mut conn,
        first,
        &[("RF-001", 15.0), ("RF-002", 10.0), ("RF-003", 19.0)],
    );
    submit_all(
        &mut conn,
        second,
        &[("RF-001", 8.0), ("RF-002", 20.0), ("RF-003", 12.0)],
    );

    let sheet = reports::assessment_report_sheet(
        &conn,
        1,
        subject_id,
        AssessmentType::Weekly,
        GradePolicy::Coarse,
    )
    .expect("variant 1 sheet");

    assert_eq!(text_at(&sheet, 0, 0), "Weekly Exam 1 (02-Mar-2026)");
    assert_eq!(text_at(&sheet, 1, 0), "Student Name");
    assert_eq!(text_at(&sheet, 1, 5), "Grade");
    // 3 data rows at 2..4, then the 3-row gap puts block 2's title at row 7.
    assert_eq!(text_at(&sheet, 7, 0), "Weekly Exam 2 (09-Mar-2026)");
    assert!(sheet.get(5, 0).is_none());
    assert!(sheet.get(6, 0).is_none());

    // Row for RF-001 in block 1: 15/20 = 75% -> B under the coarse policy.
    assert_eq!(sheet.get(2, 4), Some(&Cell::Number(75.0)));
    assert_eq!(text_at(&sheet, 2, 5), "B");

    let err = reports::assessment_report_sheet(
        &conn,
        1,
        subject_id,
        AssessmentType::Mocks,
        GradePolicy::Coarse,
    )
    .expect_err("no mocks exist");
    assert_eq!(err.code, "not_found");
}

#[test]
fn all_subjects_report_lays_out_one_panel_per_subject() {
    let (_workspace, mut conn, maths_id) = setup("campusd-variant2");
    let physics_id = seed_subject(&conn, "Physics");

    let exam = create_typed(&mut conn, maths_id, "Monthly", "2026-03-02T09:00", 100.0);
    submit_all(&mut conn, exam, &[("RF-001", 88.0), ("RF-002", 47.0)]);

    let sheet =
        reports::all_subjects_sheet(&conn, 1, 1, AssessmentType::Monthly, GradePolicy::Coarse)
            .expect("variant 2 sheet");

    assert_eq!(
        text_at(&sheet, 0, 0),
        format!("Subject: Maths (ID: {maths_id})")
    );
    assert_eq!(text_at(&sheet, 1, 0), "Monthly Exam 1 (02-Mar-2026)");

    // The Maths panel's widest block is the 6-column graded table, so the
    // Physics panel starts at column 6 + 3.
    assert_eq!(
        text_at(&sheet, 0, 9),
        format!("Subject: Physics (ID: {physics_id})")
    );
    assert_eq!(text_at(&sheet, 1, 9), "No Monthly assessments found.");
}

#[test]
fn monthlies_report_carries_quiz_columns_per_subject() {
    let (_workspace, mut conn, maths_id) = setup("campusd-variant3");
    let idle_id = seed_subject(&conn, "Idle");

    let monthly = create_typed(&mut conn, maths_id, "Monthly", "2026-03-02T09:00", 50.0);
    let quiz_ids: Vec<i64> = conn
        .prepare("SELECT quiz_id FROM quizzes WHERE monthly_assessment_id = ? ORDER BY quiz_number")
        .expect("prepare")
        .query_map([monthly], |r| r.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect");
    conn.execute(
        "UPDATE quizzes SET total_marks = 10 WHERE quiz_id = ?",
        [quiz_ids[0]],
    )
    .expect("set quiz 1 total");

    submit_all(&mut conn, monthly, &[("RF-001", 40.0)]);
    calc::submit_marks(
        &mut conn,
        quiz_ids[0],
        &[MarkEntry {
            rfid: "RF-001".to_string(),
            marks_achieved: 9.0,
        }],
        true,
    )
    .expect("quiz 1 mark");
    calc::submit_marks(
        &mut conn,
        quiz_ids[1],
        &[MarkEntry {
            rfid: "RF-001".to_string(),
            marks_achieved: 6.0,
        }],
        true,
    )
    .expect("quiz 2 mark");
    // Quiz 3 left unsubmitted: its column reads 0.

    let sheet = reports::monthlies_with_quizzes_sheet(&conn, 1, 1, GradePolicy::Coarse)
        .expect("variant 3 sheet");

    assert_eq!(
        text_at(&sheet, 0, 0),
        format!("Subject: Maths (ID: {maths_id})")
    );
    assert_eq!(text_at(&sheet, 1, 0), "Monthly Exam 1 (02-Mar-2026)");
    assert_eq!(text_at(&sheet, 2, 0), "Student Name");
    assert_eq!(text_at(&sheet, 2, 3), "Quiz 1");
    assert_eq!(text_at(&sheet, 2, 9), "Grade");

    // obtained = 40 + (9 + 6 + 0) / 3 = 45, out of 50 + 10 = 60.
    assert_eq!(text_at(&sheet, 3, 0), "Student 001");
    assert_eq!(sheet.get(3, 2), Some(&Cell::Number(40.0)));
    assert_eq!(sheet.get(3, 3), Some(&Cell::Number(9.0)));
    assert_eq!(sheet.get(3, 4), Some(&Cell::Number(6.0)));
    assert_eq!(sheet.get(3, 5), Some(&Cell::Number(0.0)));
    assert_eq!(sheet.get(3, 6), Some(&Cell::Number(45.0)));
    assert_eq!(sheet.get(3, 7), Some(&Cell::Number(60.0)));
    assert_eq!(sheet.get(3, 8), Some(&Cell::Number(75.0)));
    assert_eq!(text_at(&sheet, 3, 9), "B");

    // The Maths panel is 10 columns wide, so the next subject panel starts
    // at column 13 and notes the missing monthlies.
    assert_eq!(
        text_at(&sheet, 0, 13),
        format!("Subject: Idle (ID: {idle_id})")
    );
    assert_eq!(text_at(&sheet, 1, 13), "No Monthly assessments found.");
}

#[test]
fn subject_report_puts_each_type_in_its_own_panel() {
    let (_workspace, mut conn, subject_id) = setup("campusd-variant4");

    let monthly = create_typed(&mut conn, subject_id, "Monthly", "2026-03-02T09:00", 50.0);
    submit_all(&mut conn, monthly, &[("RF-001", 40.0)]);
    let weekly = create_typed(&mut conn, subject_id, "Weekly", "2026-03-04T09:00", 20.0);
    submit_all(&mut conn, weekly, &[("RF-001", 16.0)]);

    let sheet = reports::subject_report_sheet(&conn, 1, subject_id, GradePolicy::Coarse)
        .expect("variant 4 sheet");

    // Types are walked in canonical order: Monthly panel first, Weekly next.
    assert_eq!(text_at(&sheet, 0, 0), "Assessment Type: Monthly");
    assert_eq!(text_at(&sheet, 1, 0), "Monthly Exam 1 (02-Mar-2026)");
    assert_eq!(text_at(&sheet, 2, 2), "Monthly Marks");
    assert_eq!(text_at(&sheet, 2, 9), "Grade");

    // The Monthly panel is 10 columns wide, so Weekly starts at column 13.
    assert_eq!(text_at(&sheet, 0, 13), "Assessment Type: Weekly");
    assert_eq!(text_at(&sheet, 1, 13), "Weekly Exam 1 (04-Mar-2026)");

    let empty = seed_subject(&conn, "Idle");
    let err = reports::subject_report_sheet(&conn, 1, empty, GradePolicy::Coarse)
        .expect_err("subject with no assessments");
    assert_eq!(err.code, "not_found");
}

#[test]
fn persisted_workbooks_are_valid_zip_recorded_and_downloadable() {
    let (workspace, mut conn, subject_id) = setup("campusd-persist");
    let reports_dir = workspace.join("generated_reports");

    let exam = create_typed(&mut conn, subject_id, "Weekly", "2026-03-02T09:00", 20.0);
    submit_all(&mut conn, exam, &[("RF-001", 15.0)]);

    let sheet = reports::assessment_report_sheet(
        &conn,
        1,
        subject_id,
        AssessmentType::Weekly,
        GradePolicy::Coarse,
    )
    .expect("sheet");
    let report = reports::persist_workbook(
        &conn,
        &reports_dir,
        "assessment-report",
        &format!("s{subject_id}_Weekly"),
        "Assessments",
        &sheet,
    )
    .expect("persist");

    assert!(report.file_name.starts_with("assessment-report_s1-Weekly_"));
    assert!(report.file_name.ends_with(".xlsx"));
    assert_eq!(&report.bytes[0..4], &[0x50, 0x4B, 0x03, 0x04]);
    assert_eq!(std::fs::read(&report.file_path).expect("read file"), report.bytes);

    // The worksheet part anchors the title at A1 and the header at A2.
    let file = std::fs::File::open(&report.file_path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(file).expect("zip archive");
    let mut worksheet = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("worksheet entry")
        .read_to_string(&mut worksheet)
        .expect("read worksheet");
    assert!(worksheet.contains(r#"<c r="A1" t="inlineStr"><is><t>Weekly Exam 1 (02-Mar-2026)</t></is></c>"#));
    assert!(worksheet.contains(r#"<c r="A2" t="inlineStr"><is><t>Student Name</t></is></c>"#));
    assert!(worksheet.contains(r#"<c r="E3"><v>75</v></c>"#));

    let recorded: (String, String) = conn
        .query_row(
            "SELECT report_kind, sha256 FROM generated_reports",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("generated_reports row");
    assert_eq!(recorded.0, "assessment-report");
    assert_eq!(recorded.1, format!("{:x}", {
        use sha2::Digest;
        sha2::Sha256::digest(&report.bytes)
    }));

    let resolved =
        reports::resolve_download(&reports_dir, &report.file_name).expect("resolve download");
    assert_eq!(resolved, report.file_path);

    // Identical inputs produce identical workbook bytes.
    let again = xlsx::workbook_bytes(&sheet, "Assessments").expect("render again");
    assert_eq!(again, report.bytes);
}

#[test]
fn json_report_grades_and_guards_zero_totals() {
    let (_workspace, mut conn, subject_id) = setup("campusd-json-report");

    let exam = create_typed(&mut conn, subject_id, "Send Up", "2026-03-02T09:00", 60.0);
    submit_all(&mut conn, exam, &[("RF-001", 54.0), ("RF-002", 0.0)]);

    let report = reports::subject_json_report(
        &conn,
        subject_id,
        AssessmentType::SendUp,
        GradePolicy::Fine,
    )
    .expect("json report");
    assert_eq!(report.report_type, "Send Up");
    assert_eq!(report.grading, "fine");
    assert_eq!(report.data.len(), 2);
    assert_eq!(report.data[0].percentage, 90.0);
    assert_eq!(report.data[0].grade, "A+");
    assert_eq!(report.data[1].percentage, 0.0);
    assert_eq!(report.data[1].grade, "F");

    // A zero-total assessment reports 0% instead of faulting.
    conn.execute(
        "UPDATE assessments SET total_marks = 0 WHERE assessment_id = ?",
        [exam],
    )
    .expect("zero total");
    let report = reports::subject_json_report(
        &conn,
        subject_id,
        AssessmentType::SendUp,
        GradePolicy::Fine,
    )
    .expect("json report with zero total");
    assert!(report.data.iter().all(|r| r.percentage == 0.0));
}
