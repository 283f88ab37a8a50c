use rusqlite::{Connection, Transaction};
use std::path::Path;

pub const DB_FILE: &str = "campus.sqlite3";

pub fn open_db(data_dir: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            teacher_id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            subject_id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_name TEXT NOT NULL,
            teacher_id INTEGER,
            campus_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(teacher_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_campus_year ON subjects(campus_id, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            rfid TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            campus_id INTEGER NOT NULL,
            year INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_campus ON students(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            subject_id INTEGER NOT NULL,
            rfid TEXT NOT NULL,
            PRIMARY KEY(subject_id, rfid),
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id),
            FOREIGN KEY(rfid) REFERENCES students(rfid)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_rfid ON enrollments(rfid)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            assessment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            assessment_type TEXT NOT NULL,
            total_marks REAL NOT NULL,
            grading_criteria TEXT,
            sequence INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(teacher_id),
            UNIQUE(subject_id, assessment_type, sequence)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_subject ON assessments(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_subject_type ON assessments(subject_id, assessment_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            quiz_id INTEGER PRIMARY KEY AUTOINCREMENT,
            monthly_assessment_id INTEGER NOT NULL,
            quiz_number INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            total_marks REAL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(monthly_assessment_id)
                REFERENCES assessments(assessment_id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id),
            UNIQUE(monthly_assessment_id, quiz_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_parent ON quizzes(monthly_assessment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_subject ON quizzes(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_marks(
            id TEXT PRIMARY KEY,
            assessment_id INTEGER NOT NULL,
            rfid TEXT NOT NULL,
            marks_achieved REAL NOT NULL,
            total_marks REAL,
            FOREIGN KEY(assessment_id) REFERENCES assessments(assessment_id),
            FOREIGN KEY(rfid) REFERENCES students(rfid),
            UNIQUE(assessment_id, rfid)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_marks_assessment ON assessment_marks(assessment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_marks_rfid ON assessment_marks(rfid)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_marks(
            id TEXT PRIMARY KEY,
            quiz_id INTEGER NOT NULL,
            rfid TEXT NOT NULL,
            marks_achieved REAL NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(quiz_id),
            FOREIGN KEY(rfid) REFERENCES students(rfid),
            UNIQUE(quiz_id, rfid)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_marks_quiz ON quiz_marks(quiz_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_marks_rfid ON quiz_marks(rfid)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS generated_reports(
            id TEXT PRIMARY KEY,
            report_kind TEXT NOT NULL,
            scope TEXT NOT NULL,
            file_path TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            generated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_generated_reports_kind ON generated_reports(report_kind)",
        [],
    )?;

    Ok(conn)
}

/// Runs `f` inside a single transaction: commit on Ok, rollback on Err.
pub fn with_tx<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    E: From<rusqlite::Error>,
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
{
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}
