use super::catalog::class_exists;
use super::core::grid_shape;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_failed, parse_actor, positive_id, require_admin, resolve_term, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::timetable::{self, CapacityError, OfferingCredit, SlotDef};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn open_offerings(
    conn: &Connection,
    class_id: i64,
    year: i64,
    term: i64,
) -> Result<Vec<OfferingCredit>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT o.subject_id, s.name, s.credit
             FROM offerings o
             JOIN subjects s ON s.id = o.subject_id
             WHERE o.class_id = ? AND o.year = ? AND o.term = ? AND o.is_open = 1
             ORDER BY s.name, o.subject_id",
        )
        .map_err(db_query_failed)?;
    stmt.query_map((class_id, year, term), |row| {
        Ok(OfferingCredit {
            subject_id: row.get(0)?,
            subject_name: row.get(1)?,
            credit: row.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_failed)
}

fn handle_get_offerings(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Teacher names ride along so the shell can build the slot palette
    // without a second lookup.
    let mut stmt = match conn.prepare(
        "SELECT o.subject_id, s.name, s.credit, o.teacher_id, t.name
         FROM offerings o
         JOIN subjects s ON s.id = o.subject_id
         LEFT JOIN teachers t ON t.id = o.teacher_id
         WHERE o.class_id = ? AND o.year = ? AND o.term = ? AND o.is_open = 1
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
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "credit": credit,
                "teacherId": teacher_id,
                "teacherName": teacher_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(offerings) => ok(&req.id, json!({ "offerings": offerings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_get_slots(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT day_of_week, period, subject_id, teacher_id
         FROM schedule_slots
         WHERE class_id = ? AND year = ? AND term = ?
         ORDER BY day_of_week, period",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((class_id, key.year, key.term), |row| {
            let day_of_week: i64 = row.get(0)?;
            let period: i64 = row.get(1)?;
            let subject_id: i64 = row.get(2)?;
            let teacher_id: Option<i64> = row.get(3)?;
            Ok(json!({
                "dayOfWeek": day_of_week,
                "period": period,
                "subjectId": subject_id,
                "teacherId": teacher_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Slot payload entries with malformed day/period/subject fields are
/// dropped rather than rejected, so a shell sending a sparse grid with
/// placeholder rows does not have to pre-filter.
fn parse_slots(raw: &[serde_json::Value]) -> Vec<SlotDef> {
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(day_of_week) = positive_id(obj.get("dayOfWeek")) else {
            continue;
        };
        let Some(period) = positive_id(obj.get("period")) else {
            continue;
        };
        let Some(subject_id) = positive_id(obj.get("subjectId")) else {
            continue;
        };
        let teacher_id = positive_id(obj.get("teacherId"));
        out.push(SlotDef {
            day_of_week,
            period,
            subject_id,
            teacher_id,
        });
    }
    out
}

fn handle_replace_slots(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let Some(class_id) = positive_id(req.params.get("classId")) else {
        return err(&req.id, "bad_params", "missing/invalid classId", None);
    };
    let Some(slots_raw) = req.params.get("slots").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing slots[]", None);
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

    let parsed = parse_slots(slots_raw);

    let grid = grid_shape(conn);
    if let Some(bad) = timetable::out_of_grid(&parsed, grid) {
        return err(
            &req.id,
            "bad_params",
            "slot outside the configured grid",
            Some(json!({
                "dayOfWeek": bad.day_of_week,
                "period": bad.period,
                "days": grid.days,
                "periods": grid.periods
            })),
        );
    }

    let offerings = match open_offerings(conn, class_id, key.year, key.term) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Whole-or-nothing: one offending subject rejects the entire payload
    // and the stored schedule stays as it was. Hours are charged for the
    // payload as written; duplicate cells collapse only when stored.
    if let Err(e) = timetable::check_capacity(&parsed, &offerings) {
        return match e {
            CapacityError::UnknownSubject { subject_id } => err(
                &req.id,
                "not_found",
                "subject has no open offering for this class/term",
                Some(json!({ "subjectId": subject_id })),
            ),
            CapacityError::Exceeded {
                subject_name,
                used,
                credit,
            } => err(
                &req.id,
                "capacity_exceeded",
                format!(
                    "subject \"{}\" is scheduled for {} hours but its credit allows {}",
                    subject_name, used, credit
                ),
                Some(json!({
                    "subjectName": subject_name,
                    "used": used,
                    "credit": credit
                })),
            ),
        };
    }

    let slots = timetable::dedupe_last_wins(parsed);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM schedule_slots WHERE class_id = ? AND year = ? AND term = ?",
        (class_id, key.year, key.term),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    for slot in &slots {
        if let Err(e) = tx.execute(
            "INSERT INTO schedule_slots(class_id, day_of_week, period, year, term, subject_id, teacher_id)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                class_id,
                slot.day_of_week,
                slot.period,
                key.year,
                key.term,
                slot.subject_id,
                slot.teacher_id,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "schedule_slots" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "replaced": true, "slotCount": slots.len() }))
}

fn handle_for_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match parse_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };

    let Some(teacher_id) = positive_id(req.params.get("teacherId")) else {
        return err(&req.id, "bad_params", "missing/invalid teacherId", None);
    };
    let allowed =
        actor.role == Role::Admin || (actor.role == Role::Teacher && actor.id == teacher_id);
    if !allowed {
        return err(&req.id, "forbidden", "not authorized", None);
    }

    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT sl.day_of_week, sl.period, sl.class_id, c.name, sl.subject_id, s.name
         FROM schedule_slots sl
         JOIN classes c ON c.id = sl.class_id
         JOIN subjects s ON s.id = sl.subject_id
         WHERE sl.teacher_id = ? AND sl.year = ? AND sl.term = ?
         ORDER BY sl.day_of_week, sl.period, sl.class_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((teacher_id, key.year, key.term), |row| {
            let day_of_week: i64 = row.get(0)?;
            let period: i64 = row.get(1)?;
            let class_id: i64 = row.get(2)?;
            let class_name: String = row.get(3)?;
            let subject_id: i64 = row.get(4)?;
            let subject_name: String = row.get(5)?;
            Ok(json!({
                "dayOfWeek": day_of_week,
                "period": period,
                "classId": class_id,
                "className": class_name,
                "subjectId": subject_id,
                "subjectName": subject_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let key = match resolve_term(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let assignment: Option<(i64, String)> = match conn
        .query_row(
            "SELECT e.class_id, c.name
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             WHERE e.student_id = ? AND e.year = ? AND e.term = ?",
            (student_id, key.year, key.term),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((class_id, class_name)) = assignment else {
        // Not assigned anywhere this term: an empty week, not an error.
        return ok(
            &req.id,
            json!({ "classId": null, "className": null, "slots": [] }),
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT sl.day_of_week, sl.period, sl.subject_id, s.name, sl.teacher_id, t.name
         FROM schedule_slots sl
         JOIN subjects s ON s.id = sl.subject_id
         LEFT JOIN teachers t ON t.id = sl.teacher_id
         WHERE sl.class_id = ? AND sl.year = ? AND sl.term = ?
         ORDER BY sl.day_of_week, sl.period",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((class_id, key.year, key.term), |row| {
            let day_of_week: i64 = row.get(0)?;
            let period: i64 = row.get(1)?;
            let subject_id: i64 = row.get(2)?;
            let subject_name: String = row.get(3)?;
            let teacher_id: Option<i64> = row.get(4)?;
            let teacher_name: Option<String> = row.get(5)?;
            Ok(json!({
                "dayOfWeek": day_of_week,
                "period": period,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "teacherId": teacher_id,
                "teacherName": teacher_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(
            &req.id,
            json!({ "classId": class_id, "className": class_name, "slots": slots }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.getOfferings" => Some(handle_get_offerings(state, req)),
        "schedule.getSlots" => Some(handle_get_slots(state, req)),
        "schedule.replaceSlots" => Some(handle_replace_slots(state, req)),
        "schedule.forTeacher" => Some(handle_for_teacher(state, req)),
        "schedule.forStudent" => Some(handle_for_student(state, req)),
        _ => None,
    }
}
