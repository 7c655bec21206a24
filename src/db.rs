use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Academic years are Buddhist Era (Gregorian + 543), terms run 1..=3.
pub const YEAR_MIN: i64 = 2500;
pub const YEAR_MAX: i64 = 2600;
pub const TERM_MIN: i64 = 1;
pub const TERM_MAX: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermKey {
    pub year: i64,
    pub term: i64,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("registrar.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            responsible_teacher_id INTEGER,
            FOREIGN KEY(responsible_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    // Early workspaces predate the study-plan label on classes.
    ensure_classes_plan(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            subject_group TEXT,
            credit REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS offerings(
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            term INTEGER NOT NULL,
            teacher_id INTEGER,
            is_open INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(class_id, subject_id, year, term),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_teacher ON offerings(teacher_id, year, term)",
        [],
    )?;

    // One row per student per (year, term): the primary key is the
    // single-class-membership invariant, not just an identifier.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            term INTEGER NOT NULL,
            PRIMARY KEY(student_id, year, term),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id, year, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_slots(
            class_id INTEGER NOT NULL,
            day_of_week INTEGER NOT NULL,
            period INTEGER NOT NULL,
            year INTEGER NOT NULL,
            term INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER,
            PRIMARY KEY(class_id, day_of_week, period, year, term),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_slots_teacher ON schedule_slots(teacher_id, year, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_components(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            term INTEGER NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_components_offering
         ON score_components(class_id, subject_id, year, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            student_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            term INTEGER NOT NULL,
            component_id INTEGER NOT NULL,
            score REAL,
            PRIMARY KEY(student_id, class_id, subject_id, year, term, component_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(component_id) REFERENCES score_components(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_offering ON scores(class_id, subject_id, year, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_classes_plan(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "plan")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN plan TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Buddhist-Era year of the current local date.
pub fn current_academic_year() -> i64 {
    chrono::Local::now().year() as i64 + 543
}

/// Active term for operations that omit an explicit year/term. Falls back to
/// term 1 of the current BE year when nothing has been persisted yet.
pub fn active_term(conn: &Connection) -> anyhow::Result<TermKey> {
    if let Some(v) = settings_get_json(conn, "term.active")? {
        let year = v.get("year").and_then(|x| x.as_i64());
        let term = v.get("term").and_then(|x| x.as_i64());
        if let (Some(year), Some(term)) = (year, term) {
            return Ok(TermKey { year, term });
        }
    }
    Ok(TermKey {
        year: current_academic_year(),
        term: 1,
    })
}

pub fn set_active_term(conn: &Connection, key: TermKey) -> anyhow::Result<()> {
    settings_set_json(
        conn,
        "term.active",
        &serde_json::json!({ "year": key.year, "term": key.term }),
    )
}
