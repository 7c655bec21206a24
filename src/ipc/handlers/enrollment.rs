use super::catalog::class_exists;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{positive_id, require_admin, resolve_term};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde_json::json;
use std::collections::HashSet;

/// Free-form paste from a spreadsheet column or a chat message: commas,
/// spaces and newlines all separate usernames.
fn parse_username_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn handle_enrollment_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let raw = match req.params.get("usernames").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing usernames", None),
    };
    let tokens = parse_username_tokens(raw);
    if tokens.is_empty() {
        return err(&req.id, "bad_params", "no usernames given", None);
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

    // Resolve the whole batch in one query; unknown tokens are reported,
    // never fatal.
    let placeholders = std::iter::repeat("?")
        .take(tokens.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT id, username FROM students WHERE username IN ({})",
        placeholders
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let bind_values: Vec<Value> = tokens.iter().map(|t| Value::Text(t.clone())).collect();
    let resolved = match stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: i64 = row.get(0)?;
            let username: String = row.get(1)?;
            Ok((id, username))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let known: HashSet<&str> = resolved.iter().map(|(_, u)| u.as_str()).collect();
    let not_found: Vec<&str> = tokens
        .iter()
        .map(|t| t.as_str())
        .filter(|t| !known.contains(t))
        .collect();

    // Move semantics: the (student, year, term) primary key allows one row,
    // so any previous assignment is dropped before the new one lands.
    let mut added = 0usize;
    for (student_id, _) in &resolved {
        if let Err(e) = conn.execute(
            "DELETE FROM enrollments WHERE student_id = ? AND year = ? AND term = ?",
            (student_id, key.year, key.term),
        ) {
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
        if let Err(e) = conn.execute(
            "INSERT INTO enrollments(student_id, class_id, year, term) VALUES(?, ?, ?, ?)",
            (student_id, class_id, key.year, key.term),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            );
        }
        added += 1;
    }

    ok(
        &req.id,
        json!({ "addedCount": added, "notFound": not_found }),
    )
}

fn handle_enrollment_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let Some(student_id) = positive_id(req.params.get("studentId")) else {
        return err(&req.id, "bad_params", "missing/invalid studentId", None);
    };
    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return err(&req.id, "bad_params", "missing/invalid classId", None);
    };
    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Exact-tuple delete; removing a student who is not in the class is a
    // quiet no-op so retries stay safe.
    let changed = match conn.execute(
        "DELETE FROM enrollments
         WHERE student_id = ? AND class_id = ? AND year = ? AND term = ?",
        (student_id, class_id, key.year, key.term),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "removed": changed > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.assign" => Some(handle_enrollment_assign(state, req)),
        "enrollment.remove" => Some(handle_enrollment_remove(state, req)),
        _ => None,
    }
}
