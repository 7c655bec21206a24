use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_admin, validate_term_key};
use crate::ipc::types::{AppState, Request};
use crate::timetable::{GridShape, DEFAULT_LUNCH_PERIOD};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            tracing::info!(path = %path.display(), "workspace opened");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_term_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match db::active_term(conn) {
        Ok(key) => ok(&req.id, json!({ "year": key.year, "term": key.term })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_term_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid year", None),
    };
    let term = match req.params.get("term").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid term", None),
    };
    if let Err(e) = validate_term_key(year, term) {
        return e.response(&req.id);
    }

    match db::set_active_term(conn, db::TermKey { year, term }) {
        Ok(()) => ok(&req.id, json!({ "year": year, "term": term })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn grid_shape(conn: &rusqlite::Connection) -> GridShape {
    let mut shape = GridShape::default();
    if let Ok(Some(v)) = db::settings_get_json(conn, "schedule.grid") {
        if let Some(days) = v.get("days").and_then(|x| x.as_i64()) {
            shape.days = days;
        }
        if let Some(periods) = v.get("periods").and_then(|x| x.as_i64()) {
            shape.periods = periods;
        }
    }
    shape
}

fn lunch_period(conn: &rusqlite::Connection) -> i64 {
    db::settings_get_json(conn, "schedule.grid")
        .ok()
        .flatten()
        .and_then(|v| v.get("lunchPeriod").and_then(|x| x.as_i64()))
        .unwrap_or(DEFAULT_LUNCH_PERIOD)
}

fn handle_grid_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let shape = grid_shape(conn);
    ok(
        &req.id,
        json!({
            "days": shape.days,
            "periods": shape.periods,
            "lunchPeriod": lunch_period(conn)
        }),
    )
}

fn handle_grid_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }

    let days = match req.params.get("days").and_then(|v| v.as_i64()) {
        Some(v) if (1..=7).contains(&v) => v,
        _ => return err(&req.id, "bad_params", "days must be between 1 and 7", None),
    };
    let periods = match req.params.get("periods").and_then(|v| v.as_i64()) {
        Some(v) if (1..=12).contains(&v) => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "periods must be between 1 and 12",
                None,
            )
        }
    };
    let lunch = match req.params.get("lunchPeriod") {
        // The carried-over lunch must still land on the new grid.
        None => lunch_period(conn).min(periods),
        Some(v) => match v.as_i64() {
            Some(n) if (1..=periods).contains(&n) => n,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "lunchPeriod must be a period on the grid",
                    None,
                )
            }
        },
    };

    let blob = json!({ "days": days, "periods": periods, "lunchPeriod": lunch });
    match db::settings_set_json(conn, "schedule.grid", &blob) {
        Ok(()) => ok(&req.id, blob),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "term.get" => Some(handle_term_get(state, req)),
        "term.set" => Some(handle_term_set(state, req)),
        "schedule.getGrid" => Some(handle_grid_get(state, req)),
        "schedule.setGrid" => Some(handle_grid_set(state, req)),
        _ => None,
    }
}
