use crate::db::format_date;
use crate::ipc::helpers::{
    get_required_str, parse_opt_date, parse_opt_package_size, parse_opt_string,
    parse_opt_weekday, parse_required_date, sql_err, store_err, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::lesson_store::{self, StudentRow};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const STATUSES: [&str; 3] = ["active", "paused", "finished"];

fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    lesson_store::load_student(conn, student_id)
        .map_err(store_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn check_dates(student: &StudentRow) -> Result<(), HandlerErr> {
    if let (Some(start), Some(end)) = (student.start_date, student.end_date) {
        if end < start {
            return Err(HandlerErr::bad_params(
                "endDate must be the same as or after startDate",
            ));
        }
    }
    Ok(())
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let lesson_day_1 = parse_opt_weekday(params, "lessonDay1")?
        .ok_or_else(|| HandlerErr::bad_params("missing lessonDay1"))?;
    let package_size = match parse_opt_package_size(params, "packageSize")? {
        Some(n) => n,
        None => {
            lesson_store::load_package_settings(conn)
                .map_err(store_err("db_query_failed"))?
                .default_package_size
        }
    };
    let student = StudentRow {
        id: Uuid::new_v4().to_string(),
        name,
        cefr: parse_opt_string(params, "cefr")?,
        group_name: parse_opt_string(params, "groupName")?,
        lesson_day_1,
        lesson_day_2: parse_opt_weekday(params, "lessonDay2")?,
        package_size,
        start_date: Some(parse_required_date(params, "startDate")?),
        end_date: parse_opt_date(params, "endDate")?,
        status: "active".to_string(),
    };
    check_dates(&student)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO students(id, name, cefr, group_name, lesson_day_1, lesson_day_2,
                              package_size, start_date, end_date, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student.id,
            student.name,
            student.cefr,
            student.group_name,
            student.lesson_day_1,
            student.lesson_day_2,
            student.package_size,
            student.start_date.map(format_date),
            student.end_date.map(format_date),
            student.status,
            chrono::Utc::now().to_rfc3339(),
        ],
    )
    .map_err(sql_err("db_insert_failed"))?;
    let created = lesson_store::create_package(&tx, &student, student.package_size, None)
        .map_err(store_err("db_insert_failed"))?;
    let result = lesson_store::student_json(&tx, &student).map_err(store_err("db_query_failed"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    tracing::info!(
        student_id = %student.id,
        package_id = %created.package.id,
        "student created"
    );
    Ok(json!({
        "studentId": student.id,
        "packageId": created.package.id,
        "student": result,
        "plan": lesson_store::plan_json(&created.plan),
    }))
}

fn students_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let students = lesson_store::list_students(conn).map_err(store_err("db_query_failed"))?;
    let mut rows = Vec::with_capacity(students.len());
    for s in &students {
        rows.push(lesson_store::student_json(conn, s).map_err(store_err("db_query_failed"))?);
    }
    Ok(json!({ "students": rows }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    lesson_store::student_json(conn, &student).map_err(store_err("db_query_failed"))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let Some(fields) = patch.as_object() else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut student = require_student(conn, &student_id)?;

    for key in fields.keys() {
        match key.as_str() {
            "name" => student.name = get_required_str(patch, "name")?,
            "cefr" => student.cefr = parse_opt_string(patch, "cefr")?,
            "groupName" => student.group_name = parse_opt_string(patch, "groupName")?,
            "lessonDay1" => {
                student.lesson_day_1 = parse_opt_weekday(patch, "lessonDay1")?
                    .ok_or_else(|| HandlerErr::bad_params("lessonDay1 cannot be null"))?;
            }
            "lessonDay2" => student.lesson_day_2 = parse_opt_weekday(patch, "lessonDay2")?,
            "packageSize" => {
                student.package_size = parse_opt_package_size(patch, "packageSize")?
                    .ok_or_else(|| HandlerErr::bad_params("packageSize cannot be null"))?;
            }
            "startDate" => student.start_date = Some(parse_required_date(patch, "startDate")?),
            "endDate" => student.end_date = parse_opt_date(patch, "endDate")?,
            "status" => {
                let status = get_required_str(patch, "status")?.to_ascii_lowercase();
                if !STATUSES.contains(&status.as_str()) {
                    return Err(HandlerErr::bad_params(
                        "status must be one of: active, paused, finished",
                    ));
                }
                student.status = status;
            }
            other => return Err(HandlerErr::bad_params(format!("unknown student field: {}", other))),
        }
    }
    check_dates(&student)?;

    conn.execute(
        "UPDATE students
         SET name = ?, cefr = ?, group_name = ?, lesson_day_1 = ?, lesson_day_2 = ?,
             package_size = ?, start_date = ?, end_date = ?, status = ?
         WHERE id = ?",
        rusqlite::params![
            student.name,
            student.cefr,
            student.group_name,
            student.lesson_day_1,
            student.lesson_day_2,
            student.package_size,
            student.start_date.map(format_date),
            student.end_date.map(format_date),
            student.status,
            student.id,
        ],
    )
    .map_err(sql_err("db_update_failed"))?;
    tracing::info!(student_id = %student.id, "student updated");
    Ok(student.to_json())
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    let lessons = tx
        .execute(
            "DELETE FROM lessons WHERE package_id IN (SELECT id FROM packages WHERE student_id = ?)",
            [&student_id],
        )
        .map_err(sql_err("db_delete_failed"))?;
    let packages = tx
        .execute("DELETE FROM packages WHERE student_id = ?", [&student_id])
        .map_err(sql_err("db_delete_failed"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(sql_err("db_delete_failed"))?;
    tx.commit().map_err(sql_err("db_commit_failed"))?;

    tracing::info!(%student_id, packages, lessons, "student deleted");
    Ok(json!({
        "studentId": student_id,
        "deletedPackages": packages,
        "deletedLessons": lessons,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
