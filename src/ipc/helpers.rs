use rusqlite::Connection;

use super::error::err;
use super::types::{Actor, Request, Role};
use crate::db::{self, TermKey};

/// Handler-internal failure carrying the wire code; becomes a response line
/// once the request id is known.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

/// One refusal for every authorization failure: wrong role, someone else's
/// resource, or a target that does not exist.
pub fn forbidden() -> HandlerErr {
    HandlerErr {
        code: "forbidden",
        message: "not authorized".to_string(),
        details: None,
    }
}

pub fn db_query_failed(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

pub fn parse_actor(req: &Request) -> Result<Actor, HandlerErr> {
    let Some(raw) = req.params.get("actor") else {
        return Err(bad_params("missing params.actor"));
    };
    let actor: Actor = serde_json::from_value(raw.clone())
        .map_err(|_| bad_params("actor must be {role, id}"))?;
    if actor.id <= 0 {
        return Err(bad_params("actor.id must be a positive integer"));
    }
    Ok(actor)
}

pub fn require_admin(req: &Request) -> Result<Actor, HandlerErr> {
    let actor = parse_actor(req)?;
    if actor.role != Role::Admin {
        return Err(forbidden());
    }
    Ok(actor)
}

/// Term context for the request: explicit year+term params, or the
/// workspace's active term when both are omitted.
pub fn resolve_term(conn: &Connection, req: &Request) -> Result<TermKey, HandlerErr> {
    let year = req.params.get("year").and_then(|v| v.as_i64());
    let term = req.params.get("term").and_then(|v| v.as_i64());
    match (year, term) {
        (None, None) => {
            if req.params.get("year").is_some() || req.params.get("term").is_some() {
                return Err(bad_params("year/term must be integers"));
            }
            db::active_term(conn).map_err(db_query_failed)
        }
        (Some(year), Some(term)) => {
            validate_term_key(year, term)?;
            Ok(TermKey { year, term })
        }
        _ => Err(bad_params("year and term must be provided together")),
    }
}

pub fn validate_term_key(year: i64, term: i64) -> Result<(), HandlerErr> {
    if !(db::TERM_MIN..=db::TERM_MAX).contains(&term) {
        return Err(bad_params(format!(
            "term must be between {} and {}",
            db::TERM_MIN,
            db::TERM_MAX
        )));
    }
    if !(db::YEAR_MIN..=db::YEAR_MAX).contains(&year) {
        return Err(bad_params(format!(
            "year must be between {} and {}",
            db::YEAR_MIN,
            db::YEAR_MAX
        )));
    }
    Ok(())
}

/// Positive-integer id out of a params field, `None` for anything else.
pub fn positive_id(v: Option<&serde_json::Value>) -> Option<i64> {
    v.and_then(|v| v.as_i64()).filter(|n| *n > 0)
}
