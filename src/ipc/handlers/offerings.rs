use super::catalog::{class_exists, subject_exists, teacher_exists};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_actor, positive_id, require_admin, resolve_term};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Opening an existing offering again re-points the teacher of record and
/// flips it open; the key row is never duplicated.
fn handle_offerings_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return err(&req.id, "bad_params", "missing/invalid classId", None);
    };
    let Some(subject_id) = positive_id(req.params.get("subjectId")) else {
        return err(&req.id, "bad_params", "missing/invalid subjectId", None);
    };
    let teacher_id = positive_id(req.params.get("teacherId"));
    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match class_exists(conn, class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }
    match subject_exists(conn, subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return e.response(&req.id),
    }
    if let Some(tid) = teacher_id {
        match teacher_exists(conn, tid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "INSERT INTO offerings(class_id, subject_id, year, term, teacher_id, is_open)
         VALUES(?, ?, ?, ?, ?, 1)
         ON CONFLICT(class_id, subject_id, year, term) DO UPDATE SET
           teacher_id = excluded.teacher_id,
           is_open = 1",
        (class_id, subject_id, key.year, key.term, teacher_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "offerings" })),
        );
    }
    ok(&req.id, json!({ "opened": true }))
}

fn handle_offerings_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return err(&req.id, "bad_params", "missing/invalid classId", None);
    };
    let Some(subject_id) = positive_id(req.params.get("subjectId")) else {
        return err(&req.id, "bad_params", "missing/invalid subjectId", None);
    };
    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let changed = match conn.execute(
        "UPDATE offerings SET is_open = 0
         WHERE class_id = ? AND subject_id = ? AND year = ? AND term = ?",
        (class_id, subject_id, key.year, key.term),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "offering not found", None);
    }
    ok(&req.id, json!({ "closed": true }))
}

fn handle_offerings_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT o.subject_id, s.name, s.credit, o.teacher_id, t.name, o.is_open
         FROM offerings o
         JOIN subjects s ON s.id = o.subject_id
         LEFT JOIN teachers t ON t.id = o.teacher_id
         WHERE o.class_id = ? AND o.year = ? AND o.term = ?
         ORDER BY s.name, o.subject_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((class_id, key.year, key.term), |row| {
            let subject_id: i64 = row.get(0)?;
            let subject_name: String = row.get(1)?;
            let credit: f64 = row.get(2)?;
            let teacher_id: Option<i64> = row.get(3)?;
            let teacher_name: Option<String> = row.get(4)?;
            let is_open: i64 = row.get(5)?;
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "credit": credit,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "isOpen": is_open != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(offerings) => ok(&req.id, json!({ "offerings": offerings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "offerings.open" => Some(handle_offerings_open(state, req)),
        "offerings.close" => Some(handle_offerings_close(state, req)),
        "offerings.list" => Some(handle_offerings_list(state, req)),
        _ => None,
    }
}
