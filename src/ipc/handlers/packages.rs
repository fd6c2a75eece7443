use crate::db::format_date;
use crate::ipc::helpers::{
    get_required_str, parse_opt_bool, parse_opt_date, parse_required_date, sql_err, store_err,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::lesson_store::{self, PackageRow, StudentRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn require_package(conn: &Connection, package_id: &str) -> Result<PackageRow, HandlerErr> {
    lesson_store::load_package(conn, package_id)
        .map_err(store_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("package not found"))
}

fn require_owner(conn: &Connection, pkg: &PackageRow) -> Result<StudentRow, HandlerErr> {
    lesson_store::load_student(conn, &pkg.student_id)
        .map_err(store_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn packages_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let package_id = get_required_str(params, "packageId")?;
    let pkg = require_package(conn, &package_id)?;
    lesson_store::package_json(conn, &pkg).map_err(store_err("db_query_failed"))
}

fn packages_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let start_from = parse_opt_date(params, "startFrom")?;
    let student = lesson_store::load_student(conn, &student_id)
        .map_err(store_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    let created = lesson_store::create_package(&tx, &student, student.package_size, start_from)
        .map_err(store_err("db_insert_failed"))?;
    let package = lesson_store::package_json(&tx, &created.package)
        .map_err(store_err("db_query_failed"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    tracing::info!(
        %student_id,
        package_id = %created.package.id,
        status = ?created.plan.status(),
        "package created"
    );
    Ok(json!({
        "packageId": created.package.id,
        "package": package,
        "plan": lesson_store::plan_json(&created.plan),
    }))
}

fn packages_set_paid(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let package_id = get_required_str(params, "packageId")?;
    let paid = parse_opt_bool(params, "paid")?
        .ok_or_else(|| HandlerErr::bad_params("missing paid"))?;
    require_package(conn, &package_id)?;
    conn.execute(
        "UPDATE packages SET payment_status = ? WHERE id = ?",
        (paid as i64, &package_id),
    )
    .map_err(sql_err("db_update_failed"))?;
    tracing::info!(%package_id, paid, "payment status changed");
    Ok(json!({ "packageId": package_id, "paymentStatus": paid }))
}

fn packages_regenerate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let package_id = get_required_str(params, "packageId")?;
    let preview = parse_opt_bool(params, "preview")?.unwrap_or(false);
    let start_from = parse_opt_date(params, "startFrom")?;
    let pkg = require_package(conn, &package_id)?;
    let student = require_owner(conn, &pkg)?;

    if preview {
        let plan = lesson_store::plan_for_package(conn, &student, &pkg, start_from)
            .map_err(store_err("db_query_failed"))?;
        let mut out = lesson_store::plan_json(&plan);
        out["packageId"] = json!(package_id);
        out["committed"] = json!(false);
        return Ok(out);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    let plan = lesson_store::plan_for_package(&tx, &student, &pkg, start_from)
        .map_err(store_err("db_query_failed"))?;
    lesson_store::persist_plan(&tx, &package_id, &plan).map_err(store_err("db_update_failed"))?;
    let refreshed = require_package(&tx, &package_id)?;
    let package = lesson_store::package_json(&tx, &refreshed).map_err(store_err("db_query_failed"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    let mut out = lesson_store::plan_json(&plan);
    out["packageId"] = json!(package_id);
    out["committed"] = json!(true);
    out["package"] = package;
    Ok(out)
}

fn packages_add_makeup(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let package_id = get_required_str(params, "packageId")?;
    let lesson_date = parse_required_date(params, "lessonDate")?;
    let pkg = require_package(conn, &package_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    if lesson_store::booked_in_other_package(&tx, &pkg.student_id, &package_id, lesson_date)
        .map_err(store_err("db_query_failed"))?
    {
        return Err(HandlerErr::new(
            "conflict",
            format!("student already has a lesson on {} in another package", lesson_date),
        ));
    }
    let taken: Option<String> = tx
        .query_row(
            "SELECT id FROM lessons WHERE package_id = ? AND lesson_date = ?",
            (&package_id, format_date(lesson_date)),
            |r| r.get(0),
        )
        .optional()
        .map_err(sql_err("db_query_failed"))?;
    if taken.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!("package already has a lesson on {}", lesson_date),
        ));
    }

    let lesson_id = Uuid::new_v4().to_string();
    let next_number: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(lesson_number), 0) + 1 FROM lessons WHERE package_id = ?",
            [&package_id],
            |r| r.get(0),
        )
        .map_err(sql_err("db_query_failed"))?;
    tx.execute(
        "INSERT INTO lessons(id, package_id, lesson_number, lesson_date, is_first, is_manual_override)
         VALUES(?, ?, ?, ?, 0, 1)",
        (&lesson_id, &package_id, next_number, format_date(lesson_date)),
    )
    .map_err(sql_err("db_insert_failed"))?;
    lesson_store::renumber_package(&tx, &package_id).map_err(store_err("db_update_failed"))?;
    let refreshed = require_package(&tx, &package_id)?;
    let package = lesson_store::package_json(&tx, &refreshed).map_err(store_err("db_query_failed"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    tracing::info!(%package_id, %lesson_id, %lesson_date, "make-up lesson added");
    Ok(json!({ "lessonId": lesson_id, "package": package }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "packages.get" => Some(with_conn(state, req, packages_get)),
        "packages.create" => Some(with_conn(state, req, packages_create)),
        "packages.setPaid" => Some(with_conn(state, req, packages_set_paid)),
        "packages.regenerate" => Some(with_conn(state, req, packages_regenerate)),
        "packages.addMakeup" => Some(with_conn(state, req, packages_add_makeup)),
        _ => None,
    }
}
