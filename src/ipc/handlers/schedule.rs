use crate::db::{self, parse_date};
use crate::ipc::helpers::{
    parse_opt_date, parse_opt_package_size, parse_opt_weekday, store_err, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::lesson_store::{self, load_scheduler_settings};
use crate::schedule::{
    plan_package, resolve_anchor, weekday_from_index, ManualLesson, PackagePlanRequest, WeekdaySet,
};
use rusqlite::Connection;

fn parse_manual_dates(params: &serde_json::Value) -> Result<Vec<ManualLesson>, HandlerErr> {
    let Some(raw) = params.get("manualDates").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("manualDates must be array of YYYY-MM-DD strings"))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let date = item
            .as_str()
            .and_then(parse_date)
            .ok_or_else(|| HandlerErr::bad_params("manualDates must be array of YYYY-MM-DD strings"))?;
        out.push(ManualLesson {
            lesson_id: format!("manual-{}", i + 1),
            date,
        });
    }
    Ok(out)
}

/// Runs the planner against the workspace closures without writing
/// anything.
fn schedule_preview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let package_size = match parse_opt_package_size(params, "packageSize")? {
        Some(n) => n,
        None => {
            lesson_store::load_package_settings(conn)
                .map_err(store_err("db_query_failed"))?
                .default_package_size
        }
    };
    let weekdays = match parse_opt_weekday(params, "lessonDay1")?.and_then(weekday_from_index) {
        Some(primary) => {
            let secondary = parse_opt_weekday(params, "lessonDay2")?.and_then(weekday_from_index);
            WeekdaySet::for_package(primary, secondary, u32::try_from(package_size).unwrap_or(0))
        }
        None => WeekdaySet::new(Vec::new()),
    };
    let anchor = resolve_anchor(
        parse_opt_date(params, "startFrom")?,
        parse_opt_date(params, "startDate")?,
        lesson_store::today(),
    );
    let settings = load_scheduler_settings(conn).map_err(store_err("db_query_failed"))?;
    let request = PackagePlanRequest::new(anchor, weekdays, package_size)
        .end_date(parse_opt_date(params, "endDate")?)
        .manual_lessons(parse_manual_dates(params)?)
        .horizon_days(settings.horizon_days);
    let closures =
        db::load_closures(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let plan = plan_package(&request, &closures).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let mut out = lesson_store::plan_json(&plan);
    out["anchorDate"] = serde_json::json!(db::format_date(anchor));
    out["weekdays"] = serde_json::json!(request.weekdays.indexes());
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.preview" => Some(with_conn(state, req, schedule_preview)),
        _ => None,
    }
}
