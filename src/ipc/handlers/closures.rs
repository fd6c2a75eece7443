use crate::db::{self, format_date};
use crate::ipc::helpers::{
    get_required_str, parse_opt_string, parse_required_date, sql_err, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::ClosureRange;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn closure_json(c: &ClosureRange) -> serde_json::Value {
    json!({
        "closureId": c.id,
        "startDate": format_date(c.start),
        "endDate": format_date(c.end),
        "reason": c.reason,
        "kind": c.kind,
    })
}

fn closures_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let closures = db::load_closures(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows: Vec<serde_json::Value> = closures.iter().map(closure_json).collect();
    Ok(json!({ "closures": rows }))
}

fn closures_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let start = parse_required_date(params, "startDate")?;
    let end = parse_required_date(params, "endDate")?;
    let mut closure = ClosureRange::new(start, end)
        .map_err(|_| HandlerErr::bad_params("startDate must be <= endDate"))?;
    closure.id = Some(Uuid::new_v4().to_string());
    closure.reason = parse_opt_string(params, "reason")?;
    closure.kind = parse_opt_string(params, "kind")?;

    conn.execute(
        "INSERT INTO closures(id, start_date, end_date, reason, kind) VALUES(?, ?, ?, ?, ?)",
        (
            &closure.id,
            format_date(closure.start),
            format_date(closure.end),
            &closure.reason,
            &closure.kind,
        ),
    )
    .map_err(sql_err("db_insert_failed"))?;
    tracing::info!(
        closure_id = closure.id.as_deref().unwrap_or("-"),
        start = %closure.start,
        end = %closure.end,
        "closure created"
    );
    Ok(closure_json(&closure))
}

fn closures_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let closure_id = get_required_str(params, "closureId")?;
    let changed = conn
        .execute("DELETE FROM closures WHERE id = ?", [&closure_id])
        .map_err(sql_err("db_delete_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("closure not found"));
    }
    tracing::info!(%closure_id, "closure deleted");
    Ok(json!({ "closureId": closure_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "closures.list" => Some(with_conn(state, req, closures_list)),
        "closures.create" => Some(with_conn(state, req, closures_create)),
        "closures.delete" => Some(with_conn(state, req, closures_delete)),
        _ => None,
    }
}
