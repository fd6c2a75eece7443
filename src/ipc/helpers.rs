use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::parse_date;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::lesson_store::StoreError;
use crate::schedule::weekday_from_index;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Maps a storage failure to `db_code`, except planner input errors which
/// are always the caller's fault.
pub fn store_err(db_code: &'static str) -> impl Fn(StoreError) -> HandlerErr {
    move |e| match e {
        StoreError::Plan(plan) => HandlerErr::bad_params(plan.to_string()),
        other => {
            tracing::warn!(code = db_code, error = %other, "storage failure");
            HandlerErr::new(db_code, other.to_string())
        }
    }
}

pub fn sql_err(db_code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| {
        tracing::warn!(code = db_code, error = %e, "sqlite failure");
        HandlerErr::new(db_code, e.to_string())
    }
}

/// Runs `f` against the open workspace and wraps the outcome in a response.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn parse_opt_string(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn parse_opt_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    let Some(raw) = parse_opt_string(params, key)? else {
        return Ok(None);
    };
    parse_date(&raw)
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn parse_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_opt_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Reads a Monday=0 .. Sunday=6 weekday index; `None` when absent or null.
pub fn parse_opt_weekday(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let idx = v
                .as_i64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer 0..=6", key)))?;
            weekday_from_index(idx)
                .map(|_| Some(idx))
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer 0..=6", key)))
        }
    }
}

pub fn parse_opt_package_size(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n == 4 || n == 8 => Ok(Some(n)),
            _ => Err(HandlerErr::bad_params(format!("{} must be 4 or 8", key))),
        },
    }
}
