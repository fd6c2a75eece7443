use crate::db::format_date;
use crate::ipc::helpers::{
    get_required_str, parse_opt_bool, parse_opt_date, sql_err, store_err, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::lesson_store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn lessons_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    if let Some(fields) = patch.as_object() {
        if let Some(unknown) = fields
            .keys()
            .find(|k| k.as_str() != "lessonDate" && k.as_str() != "isManualOverride")
        {
            return Err(HandlerErr::bad_params(format!("unknown lesson field: {}", unknown)));
        }
    }
    let new_date = parse_opt_date(patch, "lessonDate")?;
    let manual_flag = parse_opt_bool(patch, "isManualOverride")?;

    let current: Option<(String, String, String, i64)> = conn
        .query_row(
            "SELECT l.package_id, p.student_id, l.lesson_date, l.is_manual_override
             FROM lessons l
             JOIN packages p ON p.id = l.package_id
             WHERE l.id = ?",
            [&lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(sql_err("db_query_failed"))?;
    let Some((package_id, student_id, current_date, current_manual)) = current else {
        return Err(HandlerErr::not_found("lesson not found"));
    };

    let date_changed = new_date.is_some_and(|d| format_date(d) != current_date);
    // Moving a lesson pins it unless the caller explicitly says otherwise.
    let is_manual = manual_flag.unwrap_or(current_manual != 0 || date_changed);

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    if let Some(date) = new_date.filter(|_| date_changed) {
        let clash: Option<String> = tx
            .query_row(
                "SELECT id FROM lessons WHERE package_id = ? AND lesson_date = ? AND id <> ?",
                (&package_id, format_date(date), &lesson_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(sql_err("db_query_failed"))?;
        if clash.is_some() {
            return Err(HandlerErr::new(
                "conflict",
                format!("package already has a lesson on {}", date),
            ));
        }
        if lesson_store::booked_in_other_package(&tx, &student_id, &package_id, date)
            .map_err(store_err("db_query_failed"))?
        {
            return Err(HandlerErr::new(
                "conflict",
                format!("student already has a lesson on {} in another package", date),
            ));
        }
        tx.execute(
            "UPDATE lessons SET lesson_date = ? WHERE id = ?",
            (format_date(date), &lesson_id),
        )
        .map_err(sql_err("db_update_failed"))?;
    }
    tx.execute(
        "UPDATE lessons SET is_manual_override = ? WHERE id = ?",
        (is_manual as i64, &lesson_id),
    )
    .map_err(sql_err("db_update_failed"))?;
    lesson_store::renumber_package(&tx, &package_id).map_err(store_err("db_update_failed"))?;
    let lesson = lesson_store::list_lessons(&tx, &package_id)
        .map_err(store_err("db_query_failed"))?
        .into_iter()
        .find(|l| l.id == lesson_id)
        .ok_or_else(|| HandlerErr::not_found("lesson not found"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    tracing::info!(%lesson_id, %package_id, is_manual, date_changed, "lesson updated");
    let mut out = lesson.to_json();
    out["packageId"] = json!(package_id);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.update" => Some(with_conn(state, req, lessons_update)),
        _ => None,
    }
}
