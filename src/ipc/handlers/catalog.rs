use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, parse_actor, positive_id, require_admin, resolve_term, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Usernames are cohort-coded: the last two digits of the academic year,
/// then a three-digit running number, e.g. "69001". The lexical MAX below
/// cannot rank a four-digit suffix, so a full cohort refuses further
/// creates instead of colliding on the UNIQUE column.
fn allocate_username(conn: &Connection, year: i64) -> Result<String, HandlerErr> {
    let prefix = format!("{:02}", year % 100);
    let like = format!("{}%", prefix);
    let latest: Option<String> = conn
        .query_row(
            "SELECT username FROM students WHERE username LIKE ? ORDER BY username DESC LIMIT 1",
            [&like],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;

    let next = match latest {
        Some(u) => u.get(2..).and_then(|t| t.parse::<i64>().ok()).unwrap_or(0) + 1,
        None => 1,
    };
    if next > 999 {
        return Err(HandlerErr {
            code: "capacity_exceeded",
            message: format!("cohort {} has no usernames left", year),
            details: Some(json!({ "year": year })),
        });
    }
    Ok(format!("{}{:03}", prefix, next))
}

fn row_exists(conn: &Connection, sql: &str, id: i64) -> Result<bool, HandlerErr> {
    let hit: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(db_query_failed)?;
    Ok(hit.is_some())
}

pub fn class_exists(conn: &Connection, class_id: i64) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", class_id)
}

pub fn subject_exists(conn: &Connection, subject_id: i64) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", subject_id)
}

pub fn teacher_exists(conn: &Connection, teacher_id: i64) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", teacher_id)
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    if let Err(e) = conn.execute("INSERT INTO teachers(name) VALUES(?)", [&name]) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    ok(&req.id, json!({ "teacherId": conn.last_insert_rowid() }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = parse_actor(req) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare("SELECT id, name FROM teachers ORDER BY name, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let username = match allocate_username(conn, key.year) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO students(name, username) VALUES(?, ?)",
        (&name, &username),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({ "studentId": conn.last_insert_rowid(), "username": username }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = parse_actor(req) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare("SELECT id, username, name FROM students ORDER BY username") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let username: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(json!({ "id": id, "username": username, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let plan = req
        .params
        .get("plan")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let responsible = positive_id(req.params.get("responsibleTeacherId"));
    if let Some(tid) = responsible {
        match teacher_exists(conn, tid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "INSERT INTO classes(name, plan, responsible_teacher_id) VALUES(?, ?, ?)",
        (&name, &plan, responsible),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }
    ok(&req.id, json!({ "classId": conn.last_insert_rowid() }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = parse_actor(req) {
        return e.response(&req.id);
    }
    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Enrolled headcount for the resolved term makes the listing usable as
    // a dashboard without a follow-up roster call per class.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.plan,
           c.responsible_teacher_id,
           t.name,
           (SELECT COUNT(*) FROM enrollments e
             WHERE e.class_id = c.id AND e.year = ?1 AND e.term = ?2) AS student_count
         FROM classes c
         LEFT JOIN teachers t ON t.id = c.responsible_teacher_id
         ORDER BY c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((key.year, key.term), |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let plan: Option<String> = row.get(2)?;
            let teacher_id: Option<i64> = row.get(3)?;
            let teacher_name: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "plan": plan,
                "responsibleTeacherId": teacher_id,
                "responsibleTeacherName": teacher_name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = parse_actor(req) {
        return e.response(&req.id);
    }

    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return err(&req.id, "bad_params", "missing/invalid classId", None);
    };
    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match class_exists(conn, class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    match roster(conn, class_id, key.year, key.term) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => e.response(&req.id),
    }
}

/// Enrolled students of a class for a term, in username order.
pub fn roster(
    conn: &Connection,
    class_id: i64,
    year: i64,
    term: i64,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.username, s.name
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ? AND e.year = ? AND e.term = ?
             ORDER BY s.username",
        )
        .map_err(db_query_failed)?;
    stmt.query_map((class_id, year, term), |row| {
        let id: i64 = row.get(0)?;
        let username: String = row.get(1)?;
        let name: String = row.get(2)?;
        Ok(json!({ "id": id, "username": username, "name": name }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_failed)
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let group = req
        .params
        .get("group")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let credit = match req.params.get("credit").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "credit must be a non-negative number",
                None,
            )
        }
    };

    if let Err(e) = conn.execute(
        "INSERT INTO subjects(name, subject_group, credit) VALUES(?, ?, ?)",
        (&name, &group, credit),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(&req.id, json!({ "subjectId": conn.last_insert_rowid() }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = parse_actor(req) {
        return e.response(&req.id);
    }

    let mut stmt =
        match conn.prepare("SELECT id, name, subject_group, credit FROM subjects ORDER BY name, id")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let group: Option<String> = row.get(2)?;
            let credit: f64 = row.get(3)?;
            Ok(json!({ "id": id, "name": name, "group": group, "credit": credit }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.roster" => Some(handle_classes_roster(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        _ => None,
    }
}
