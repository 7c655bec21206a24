use super::catalog::roster;
use crate::calc::{self, ComponentDef};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, forbidden, parse_actor, positive_id, resolve_term, HandlerErr,
};
use crate::ipc::types::{Actor, AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

/// A fresh ledger starts as the classic midterm/final split until the
/// teacher of record reshapes it.
const SEED_COMPONENTS: [(&str, f64); 2] = [("midterm", 50.0), ("final", 50.0)];

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// The four columns every score operation is scoped by.
#[derive(Debug, Clone, Copy)]
struct OfferingKey {
    class_id: i64,
    subject_id: i64,
    year: i64,
    term: i64,
}

fn offering_key(conn: &Connection, req: &Request) -> Result<OfferingKey, HandlerErr> {
    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return Err(bad_params("missing/invalid classId"));
    };
    let Some(subject_id) = positive_id(req.params.get("subjectId")) else {
        return Err(bad_params("missing/invalid subjectId"));
    };
    let key = resolve_term(conn, req)?;
    Ok(OfferingKey {
        class_id,
        subject_id,
        year: key.year,
        term: key.term,
    })
}

/// The gate for ledger writes and teacher views: the actor must be the
/// teacher of record on the offering row itself. Anything else, including
/// an admin or an offering that does not exist, gets the same refusal.
fn require_teacher_of_record(
    conn: &Connection,
    req: &Request,
    k: &OfferingKey,
) -> Result<Actor, HandlerErr> {
    let actor = parse_actor(req)?;
    if actor.role != Role::Teacher {
        return Err(forbidden());
    }
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM offerings
             WHERE class_id = ? AND subject_id = ? AND year = ? AND term = ? AND teacher_id = ?",
            (k.class_id, k.subject_id, k.year, k.term, actor.id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;
    if hit.is_none() {
        return Err(forbidden());
    }
    Ok(actor)
}

fn load_components(conn: &Connection, k: &OfferingKey) -> Result<Vec<ComponentDef>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, weight, sort_order FROM score_components
             WHERE class_id = ? AND subject_id = ? AND year = ? AND term = ?
             ORDER BY sort_order, id",
        )
        .map_err(db_query_failed)?;
    stmt.query_map((k.class_id, k.subject_id, k.year, k.term), |row| {
        Ok(ComponentDef {
            id: row.get(0)?,
            name: row.get(1)?,
            weight: row.get(2)?,
            sort_order: row.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_failed)
}

fn seed_default_components(conn: &Connection, k: &OfferingKey) -> Result<(), HandlerErr> {
    for (i, (name, weight)) in SEED_COMPONENTS.iter().enumerate() {
        conn.execute(
            "INSERT INTO score_components(class_id, subject_id, year, term, name, weight, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (k.class_id, k.subject_id, k.year, k.term, name, weight, i as i64),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "score_components" })),
        })?;
    }
    Ok(())
}

/// All cells for the offering, including explicitly cleared (NULL) ones.
/// Joining back to score_components drops any cell whose component belongs
/// to a different offering.
fn load_cells(
    conn: &Connection,
    k: &OfferingKey,
) -> Result<Vec<(i64, i64, Option<f64>)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sc.student_id, sc.component_id, sc.score
             FROM scores sc
             JOIN score_components c ON c.id = sc.component_id
               AND c.class_id = sc.class_id
               AND c.subject_id = sc.subject_id
               AND c.year = sc.year
               AND c.term = sc.term
             WHERE sc.class_id = ? AND sc.subject_id = ? AND sc.year = ? AND sc.term = ?",
        )
        .map_err(db_query_failed)?;
    stmt.query_map((k.class_id, k.subject_id, k.year, k.term), |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_failed)
}

/// Graded cells grouped per student, keyed by component id.
fn graded_by_student(cells: &[(i64, i64, Option<f64>)]) -> HashMap<i64, HashMap<i64, f64>> {
    let mut by_student: HashMap<i64, HashMap<i64, f64>> = HashMap::new();
    for (student_id, component_id, score) in cells {
        if let Some(v) = score {
            by_student
                .entry(*student_id)
                .or_default()
                .insert(*component_id, *v);
        }
    }
    by_student
}

fn handle_components_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let k = match offering_key(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_teacher_of_record(conn, req, &k) {
        return e.response(&req.id);
    }

    let students = match roster(conn, k.class_id, k.year, k.term) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut components = match load_components(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if components.is_empty() {
        if let Err(e) = seed_default_components(conn, &k) {
            return e.response(&req.id);
        }
        components = match load_components(conn, &k) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
    }

    let cells = match load_cells(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let scores: Vec<serde_json::Value> = cells
        .iter()
        .map(|(student_id, component_id, score)| {
            json!({
                "studentId": student_id,
                "componentId": component_id,
                "score": score
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "students": students,
            "components": components,
            "scores": scores
        }),
    )
}

fn handle_components_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let k = match offering_key(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_teacher_of_record(conn, req, &k) {
        return e.response(&req.id);
    }

    let Some(raw) = req.params.get("components").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing components[]", None);
    };

    let mut incoming: Vec<(String, f64)> = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("component {}", i + 1));
        let weight = match entry.get("weight").and_then(|v| v.as_f64()) {
            Some(w) if w.is_finite() && w >= 0.0 => w,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("component at index {} has an invalid weight", i),
                    None,
                )
            }
        };
        incoming.push((name, weight));
    }

    let total: f64 = incoming.iter().map(|(_, w)| w).sum();
    if (total - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        return err(
            &req.id,
            "weight_mismatch",
            format!("component weights must sum to 100, got {}", total),
            Some(json!({ "total": total })),
        );
    }

    // Replacing the component list invalidates every recorded cell: scores
    // reference components by id and the new list gets fresh ids, even when
    // the names and weights look identical.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM scores WHERE class_id = ? AND subject_id = ? AND year = ? AND term = ?",
        (k.class_id, k.subject_id, k.year, k.term),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "DELETE FROM score_components WHERE class_id = ? AND subject_id = ? AND year = ? AND term = ?",
        (k.class_id, k.subject_id, k.year, k.term),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    let mut fresh: Vec<ComponentDef> = Vec::with_capacity(incoming.len());
    for (i, (name, weight)) in incoming.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO score_components(class_id, subject_id, year, term, name, weight, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (k.class_id, k.subject_id, k.year, k.term, name, weight, i as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "score_components" })),
            );
        }
        fresh.push(ComponentDef {
            id: tx.last_insert_rowid(),
            name: name.clone(),
            weight: *weight,
            sort_order: i as i64,
        });
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "components": fresh }))
}

fn handle_scores_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let k = match offering_key(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_teacher_of_record(conn, req, &k) {
        return e.response(&req.id);
    }

    let Some(entries) = req.params.get("scores").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing scores[]", None);
    };

    let mut updated = 0usize;
    for entry in entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(student_id) = positive_id(obj.get("studentId")) else {
            continue;
        };
        let Some(component_id) = positive_id(obj.get("componentId")) else {
            continue;
        };
        // Absent or null clears the cell back to "not graded yet"; anything
        // non-numeric is dropped.
        let score = match obj.get("score") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_f64() {
                Some(n) if n.is_finite() => Some(n),
                _ => continue,
            },
        };

        if let Err(e) = conn.execute(
            "INSERT INTO scores(student_id, class_id, subject_id, year, term, component_id, score)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, class_id, subject_id, year, term, component_id)
             DO UPDATE SET score = excluded.score",
            (
                student_id,
                k.class_id,
                k.subject_id,
                k.year,
                k.term,
                component_id,
                score,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "scores" })),
            );
        }
        updated += 1;
    }

    ok(&req.id, json!({ "updated": updated }))
}

fn handle_scores_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let k = match offering_key(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_teacher_of_record(conn, req, &k) {
        return e.response(&req.id);
    }

    let students = match roster(conn, k.class_id, k.year, k.term) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let components = match load_components(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cells = match load_cells(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let graded = graded_by_student(&cells);

    let empty = HashMap::new();
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    let mut totals: Vec<f64> = Vec::new();
    for student in &students {
        let student_id = student.get("id").and_then(|v| v.as_i64()).unwrap_or(0);
        let cells_for_student = graded.get(&student_id).unwrap_or(&empty);
        let total = calc::weighted_total(&components, cells_for_student);
        let grade = total.map(calc::score_to_grade);
        if let Some(t) = total {
            totals.push(t);
        }
        rows.push(json!({
            "id": student.get("id"),
            "username": student.get("username"),
            "name": student.get("name"),
            "total": total,
            "grade": grade
        }));
    }

    let statistics = calc::class_statistics(&totals);
    let histogram = calc::histogram(&totals);

    ok(
        &req.id,
        json!({
            "students": rows,
            "statistics": statistics,
            "histogram": histogram
        }),
    )
}

fn handle_scores_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match parse_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let Some(student_id) = positive_id(req.params.get("studentId")) else {
        return err(&req.id, "bad_params", "missing/invalid studentId", None);
    };
    let allowed =
        actor.role == Role::Admin || (actor.role == Role::Student && actor.id == student_id);
    if !allowed {
        return err(&req.id, "forbidden", "not authorized", None);
    }

    let k = match offering_key(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let enrolled: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE student_id = ? AND class_id = ? AND year = ? AND term = ?",
            (student_id, k.class_id, k.year, k.term),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_none() {
        return err(&req.id, "not_found", "student is not in this class", None);
    }

    let components = match load_components(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cells = match load_cells(conn, &k) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let graded = graded_by_student(&cells);

    // The whole roster's totals form the population the student is ranked
    // against; ungraded classmates simply drop out of it.
    let roster_rows = match roster(conn, k.class_id, k.year, k.term) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let empty = HashMap::new();
    let mut totals: Vec<f64> = Vec::new();
    let mut own_total: Option<f64> = None;
    for student in &roster_rows {
        let sid = student.get("id").and_then(|v| v.as_i64()).unwrap_or(0);
        let total = calc::weighted_total(&components, graded.get(&sid).unwrap_or(&empty));
        if let Some(t) = total {
            totals.push(t);
        }
        if sid == student_id {
            own_total = total;
        }
    }

    let own_cells: Vec<serde_json::Value> = cells
        .iter()
        .filter(|(sid, _, _)| *sid == student_id)
        .map(|(_, component_id, score)| json!({ "componentId": component_id, "score": score }))
        .collect();

    let grade = own_total.map(calc::score_to_grade);
    let statistics = calc::class_statistics(&totals);
    let percentile = own_total.and_then(|t| calc::percentile(&totals, t));
    let histogram = calc::histogram(&totals);

    ok(
        &req.id,
        json!({
            "components": components,
            "cells": own_cells,
            "total": own_total,
            "grade": grade,
            "statistics": statistics,
            "percentile": percentile,
            "histogram": histogram
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "components.get" => Some(handle_components_get(state, req)),
        "components.replace" => Some(handle_components_replace(state, req)),
        "scores.set" => Some(handle_scores_set(state, req)),
        "scores.summary" => Some(handle_scores_summary(state, req)),
        "scores.forStudent" => Some(handle_scores_for_student(state, req)),
        _ => None,
    }
}
