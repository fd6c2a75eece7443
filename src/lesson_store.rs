//! Bridges the pure planner and the workspace database: loads the inputs a
//! plan needs and writes plans back as lesson rows.

use chrono::{Days, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{self, format_date, parse_date};
use crate::schedule::{
    plan_package, resolve_anchor, weekday_from_index, ClosureRange, PackagePlan,
    PackagePlanRequest, PlanError, WeekdaySet, DEFAULT_HORIZON_DAYS,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub cefr: Option<String>,
    pub group_name: Option<String>,
    pub lesson_day_1: i64,
    pub lesson_day_2: Option<i64>,
    pub package_size: i64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: String,
}

impl StudentRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "studentId": self.id,
            "name": self.name,
            "cefr": self.cefr,
            "groupName": self.group_name,
            "lessonDay1": self.lesson_day_1,
            "lessonDay2": self.lesson_day_2,
            "packageSize": self.package_size,
            "startDate": self.start_date.map(format_date),
            "endDate": self.end_date.map(format_date),
            "status": self.status,
        })
    }

    /// Weekdays a package of `package_size` lessons is taught on. Unknown
    /// day indexes yield an empty set, which the planner rejects.
    pub fn weekdays(&self, package_size: i64) -> WeekdaySet {
        let Some(primary) = weekday_from_index(self.lesson_day_1) else {
            return WeekdaySet::new(Vec::new());
        };
        let secondary = self.lesson_day_2.and_then(weekday_from_index);
        WeekdaySet::for_package(primary, secondary, u32::try_from(package_size).unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
pub struct PackageRow {
    pub id: String,
    pub student_id: String,
    pub package_size: i64,
    pub anchor_date: Option<NaiveDate>,
    pub first_lesson_date: Option<NaiveDate>,
    pub payment_status: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LessonRow {
    pub id: String,
    pub lesson_number: i64,
    pub lesson_date: Option<NaiveDate>,
    pub is_first: bool,
    pub is_manual_override: bool,
}

impl LessonRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "lessonId": self.id,
            "lessonNumber": self.lesson_number,
            "lessonDate": self.lesson_date.map(format_date),
            "isFirst": self.is_first,
            "isManualOverride": self.is_manual_override,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub horizon_days: u32,
    pub avoid_student_double_booking: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PackageSettings {
    pub default_package_size: i64,
    pub carry_over_from_previous_package: bool,
}

/// Saved JSON for a setup section. A missing row or a non-object value reads
/// as empty so defaults apply; storage and JSON failures are returned.
fn load_setup_section(
    conn: &Connection,
    key: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    let saved = db::settings_get_json(conn, key)?;
    Ok(saved
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default())
}

pub fn load_scheduler_settings(conn: &Connection) -> Result<SchedulerSettings, StoreError> {
    let obj = load_setup_section(conn, "setup.scheduler")?;
    let horizon_days = obj
        .get("horizonDays")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_HORIZON_DAYS);
    let avoid_student_double_booking = obj
        .get("avoidStudentDoubleBooking")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    Ok(SchedulerSettings {
        horizon_days,
        avoid_student_double_booking,
    })
}

pub fn load_package_settings(conn: &Connection) -> Result<PackageSettings, StoreError> {
    let obj = load_setup_section(conn, "setup.packages")?;
    let default_package_size = obj
        .get("defaultPackageSize")
        .and_then(|v| v.as_i64())
        .filter(|v| *v == 4 || *v == 8)
        .unwrap_or(4);
    let carry_over_from_previous_package = obj
        .get("carryOverFromPreviousPackage")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    Ok(PackageSettings {
        default_package_size,
        carry_over_from_previous_package,
    })
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, name, cefr, group_name, lesson_day_1, lesson_day_2, package_size,
                    start_date, end_date, status
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    cefr: r.get(2)?,
                    group_name: r.get(3)?,
                    lesson_day_1: r.get(4)?,
                    lesson_day_2: r.get(5)?,
                    package_size: r.get(6)?,
                    start_date: r.get::<_, String>(7).map(|s| parse_date(&s))?,
                    end_date: r.get::<_, Option<String>>(8)?.and_then(|s| parse_date(&s)),
                    status: r.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn list_students(conn: &Connection) -> Result<Vec<StudentRow>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM students ORDER BY name, id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(s) = load_student(conn, &id)? {
            out.push(s);
        }
    }
    Ok(out)
}

fn package_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PackageRow> {
    Ok(PackageRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        package_size: r.get(2)?,
        anchor_date: r.get::<_, String>(3).map(|s| parse_date(&s))?,
        first_lesson_date: r.get::<_, Option<String>>(4)?.and_then(|s| parse_date(&s)),
        payment_status: r.get::<_, i64>(5)? != 0,
        created_at: r.get(6)?,
    })
}

pub fn load_package(conn: &Connection, package_id: &str) -> Result<Option<PackageRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, student_id, package_size, anchor_date, first_lesson_date,
                    payment_status, created_at
             FROM packages WHERE id = ?",
            [package_id],
            package_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_packages(conn: &Connection, student_id: &str) -> Result<Vec<PackageRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, package_size, anchor_date, first_lesson_date,
                payment_status, created_at
         FROM packages WHERE student_id = ?
         ORDER BY anchor_date, created_at, id",
    )?;
    let rows = stmt
        .query_map([student_id], package_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_lessons(conn: &Connection, package_id: &str) -> Result<Vec<LessonRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_number, lesson_date, is_first, is_manual_override
         FROM lessons WHERE package_id = ?
         ORDER BY lesson_number",
    )?;
    let rows = stmt
        .query_map([package_id], |r| {
            Ok(LessonRow {
                id: r.get(0)?,
                lesson_number: r.get(1)?,
                lesson_date: r.get::<_, String>(2).map(|s| parse_date(&s))?,
                is_first: r.get::<_, i64>(3)? != 0,
                is_manual_override: r.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn package_json(conn: &Connection, pkg: &PackageRow) -> Result<serde_json::Value, StoreError> {
    let lessons: Vec<serde_json::Value> = list_lessons(conn, &pkg.id)?
        .iter()
        .map(LessonRow::to_json)
        .collect();
    Ok(json!({
        "packageId": pkg.id,
        "studentId": pkg.student_id,
        "packageSize": pkg.package_size,
        "anchorDate": pkg.anchor_date.map(format_date),
        "firstLessonDate": pkg.first_lesson_date.map(format_date),
        "paymentStatus": pkg.payment_status,
        "createdAt": pkg.created_at,
        "lessons": lessons,
    }))
}

pub fn student_json(conn: &Connection, student: &StudentRow) -> Result<serde_json::Value, StoreError> {
    let mut packages = Vec::new();
    for pkg in list_packages(conn, &student.id)? {
        packages.push(package_json(conn, &pkg)?);
    }
    let mut out = student.to_json();
    out["packages"] = serde_json::Value::Array(packages);
    Ok(out)
}

pub fn plan_json(plan: &PackagePlan) -> serde_json::Value {
    let lessons: Vec<serde_json::Value> = plan
        .slots
        .iter()
        .map(|s| {
            json!({
                "lessonNumber": s.sequence_number,
                "lessonDate": format_date(s.date),
                "isFirst": s.is_first,
                "isManualOverride": s.is_manual(),
                "lessonId": s.manual_lesson_id(),
            })
        })
        .collect();
    let skipped: Vec<serde_json::Value> = plan
        .skipped_closures
        .iter()
        .map(|c| {
            json!({
                "closureId": c.id,
                "startDate": format_date(c.start),
                "endDate": format_date(c.end),
            })
        })
        .collect();
    json!({
        "status": plan.status(),
        "requested": plan.requested,
        "horizon": format_date(plan.horizon),
        "firstLessonDate": plan.first_lesson_date().map(format_date),
        "proposedLessons": lessons,
        "skippedClosures": skipped,
    })
}

/// Builds the planner input for `package` from the current workspace
/// state. Closures are re-read on every call.
pub fn build_request(
    conn: &Connection,
    student: &StudentRow,
    package: &PackageRow,
    start_from: Option<NaiveDate>,
) -> Result<(PackagePlanRequest, Vec<ClosureRange>), StoreError> {
    let settings = load_scheduler_settings(conn)?;
    let anchor = resolve_anchor(
        start_from,
        package.anchor_date.or(student.start_date),
        today(),
    );
    let manual = db::load_manual_lessons(conn, &package.id)?;
    let reserved = if settings.avoid_student_double_booking {
        db::student_booked_dates(conn, &student.id, Some(&package.id))?
    } else {
        Vec::new()
    };
    let request = PackagePlanRequest::new(anchor, student.weekdays(package.package_size), package.package_size)
        .end_date(student.end_date)
        .manual_lessons(manual)
        .reserved_dates(reserved)
        .horizon_days(settings.horizon_days);
    let closures = db::load_closures(conn)?;
    Ok((request, closures))
}

pub fn plan_for_package(
    conn: &Connection,
    student: &StudentRow,
    package: &PackageRow,
    start_from: Option<NaiveDate>,
) -> Result<PackagePlan, StoreError> {
    let (request, closures) = build_request(conn, student, package, start_from)?;
    Ok(plan_package(&request, &closures)?)
}

/// Moves every lesson number of the package out of the 1..N range so rows
/// can be renumbered without tripping UNIQUE(package_id, lesson_number).
fn park_lesson_numbers(conn: &Connection, package_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE lessons SET lesson_number = -lesson_number, is_first = 0 WHERE package_id = ?",
        [package_id],
    )?;
    Ok(())
}

fn set_first_lesson_date(
    conn: &Connection,
    package_id: &str,
    first: Option<NaiveDate>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE packages SET first_lesson_date = ? WHERE id = ?",
        (first.map(format_date), package_id),
    )?;
    Ok(())
}

/// Replaces the generated lessons of a package with `plan`. Manual rows are
/// kept and only renumbered. Expects to run inside the caller's
/// transaction.
pub fn persist_plan(conn: &Connection, package_id: &str, plan: &PackagePlan) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM lessons WHERE package_id = ? AND is_manual_override = 0",
        [package_id],
    )?;
    park_lesson_numbers(conn, package_id)?;
    for slot in &plan.slots {
        match slot.manual_lesson_id() {
            Some(lesson_id) => {
                conn.execute(
                    "UPDATE lessons SET lesson_number = ?, is_first = ? WHERE id = ?",
                    (slot.sequence_number, slot.is_first as i64, lesson_id),
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO lessons(id, package_id, lesson_number, lesson_date, is_first, is_manual_override)
                     VALUES(?, ?, ?, ?, ?, 0)",
                    (
                        Uuid::new_v4().to_string(),
                        package_id,
                        slot.sequence_number,
                        format_date(slot.date),
                        slot.is_first as i64,
                    ),
                )?;
            }
        }
    }
    set_first_lesson_date(conn, package_id, plan.first_lesson_date())?;
    tracing::info!(
        package_id,
        lessons = plan.slots.len(),
        generated = plan.generated_count(),
        "persisted package plan"
    );
    Ok(())
}

/// Renumbers existing lessons by ascending date without generating new
/// ones. Used after manual edits.
pub fn renumber_package(conn: &Connection, package_id: &str) -> Result<(), StoreError> {
    let mut lessons = list_lessons(conn, package_id)?;
    lessons.sort_by_key(|l| (l.lesson_date, l.lesson_number));
    park_lesson_numbers(conn, package_id)?;
    for (i, lesson) in lessons.iter().enumerate() {
        conn.execute(
            "UPDATE lessons SET lesson_number = ?, is_first = ? WHERE id = ?",
            ((i + 1) as i64, (i == 0) as i64, &lesson.id),
        )?;
    }
    set_first_lesson_date(conn, package_id, lessons.first().and_then(|l| l.lesson_date))?;
    Ok(())
}

/// True when `date` already holds a lesson in another package of the same
/// student and double booking is being avoided.
pub fn booked_in_other_package(
    conn: &Connection,
    student_id: &str,
    package_id: &str,
    date: NaiveDate,
) -> Result<bool, StoreError> {
    if !load_scheduler_settings(conn)?.avoid_student_double_booking {
        return Ok(false);
    }
    Ok(db::student_booked_dates(conn, student_id, Some(package_id))?.contains(&date))
}

/// Where a new package for `student` starts scanning: the explicit start,
/// else the day after the student's last booked lesson (when carry-over is
/// on), else the student's start date, else today.
pub fn next_package_anchor(
    conn: &Connection,
    student: &StudentRow,
    start_from: Option<NaiveDate>,
) -> Result<NaiveDate, StoreError> {
    if let Some(start) = start_from {
        return Ok(start);
    }
    if load_package_settings(conn)?.carry_over_from_previous_package {
        let booked = db::student_booked_dates(conn, &student.id, None)?;
        if let Some(last) = booked.into_iter().max() {
            let next = last.checked_add_days(Days::new(1)).unwrap_or(last);
            return Ok(match student.start_date {
                Some(start) if start > next => start,
                _ => next,
            });
        }
    }
    Ok(resolve_anchor(None, student.start_date, today()))
}

pub struct CreatedPackage {
    pub package: PackageRow,
    pub plan: PackagePlan,
}

/// Inserts a package for `student` and persists its first plan. Expects to
/// run inside the caller's transaction.
pub fn create_package(
    conn: &Connection,
    student: &StudentRow,
    package_size: i64,
    start_from: Option<NaiveDate>,
) -> Result<CreatedPackage, StoreError> {
    let anchor = next_package_anchor(conn, student, start_from)?;
    let package = PackageRow {
        id: Uuid::new_v4().to_string(),
        student_id: student.id.clone(),
        package_size,
        anchor_date: Some(anchor),
        first_lesson_date: None,
        payment_status: false,
        created_at: Some(chrono::Utc::now().to_rfc3339()),
    };
    // Plan before inserting so an invalid configuration leaves no row behind.
    let plan = plan_for_package(conn, student, &package, Some(anchor))?;
    conn.execute(
        "INSERT INTO packages(id, student_id, package_size, anchor_date, payment_status, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (
            &package.id,
            &package.student_id,
            package.package_size,
            format_date(anchor),
            &package.created_at,
        ),
    )?;
    persist_plan(conn, &package.id, &plan)?;
    let package = PackageRow {
        first_lesson_date: plan.first_lesson_date(),
        ..package
    };
    Ok(CreatedPackage { package, plan })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(name: &str) -> Connection {
        let dir = std::env::temp_dir().join(format!(
            "tuitiond-store-{}-{}",
            name,
            std::process::id()
        ));
        db::open_db(&dir).expect("open workspace")
    }

    #[test]
    fn unset_settings_use_defaults() {
        let conn = workspace("defaults");
        let scheduler = load_scheduler_settings(&conn).expect("scheduler settings");
        assert_eq!(scheduler.horizon_days, DEFAULT_HORIZON_DAYS);
        assert!(scheduler.avoid_student_double_booking);
        let packages = load_package_settings(&conn).expect("package settings");
        assert_eq!(packages.default_package_size, 4);
        assert!(packages.carry_over_from_previous_package);
    }

    #[test]
    fn unreadable_settings_are_errors() {
        let conn = workspace("corrupt");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.scheduler', '{not json')
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
            [],
        )
        .expect("write corrupt row");
        assert!(matches!(
            load_scheduler_settings(&conn),
            Err(StoreError::Other(_))
        ));
    }
}
