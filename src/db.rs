use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::schedule::{ClosureRange, ManualLesson};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tuition.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            cefr TEXT,
            group_name TEXT,
            lesson_day_1 INTEGER NOT NULL,
            lesson_day_2 INTEGER,
            package_size INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            created_at TEXT
        )",
        [],
    )?;
    ensure_students_status(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS packages(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            package_size INTEGER NOT NULL,
            anchor_date TEXT NOT NULL,
            first_lesson_date TEXT,
            payment_status INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_packages_student ON packages(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            package_id TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            lesson_date TEXT NOT NULL,
            is_first INTEGER NOT NULL DEFAULT 0,
            is_manual_override INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(package_id) REFERENCES packages(id),
            UNIQUE(package_id, lesson_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_package ON lessons(package_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_package_date ON lessons(package_id, lesson_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS closures(
            id TEXT PRIMARY KEY,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT,
            kind TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_closures_start ON closures(start_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Snapshot of every closure row. Rows whose dates do not parse are
/// dropped; inverted ranges are passed through so the planner can report
/// them.
pub fn load_closures(conn: &Connection) -> anyhow::Result<Vec<ClosureRange>> {
    let mut stmt = conn.prepare(
        "SELECT id, start_date, end_date, reason, kind
         FROM closures
         ORDER BY start_date, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, start_raw, end_raw, reason, kind) in rows {
        let (Some(start), Some(end)) = (parse_date(&start_raw), parse_date(&end_raw)) else {
            tracing::warn!(closure_id = %id, "closure row has unreadable dates");
            continue;
        };
        out.push(ClosureRange {
            id: Some(id),
            start,
            end,
            reason,
            kind,
        });
    }
    Ok(out)
}

pub fn load_manual_lessons(conn: &Connection, package_id: &str) -> anyhow::Result<Vec<ManualLesson>> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_date
         FROM lessons
         WHERE package_id = ? AND is_manual_override = 1
         ORDER BY lesson_date, lesson_number",
    )?;
    let rows = stmt
        .query_map([package_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (lesson_id, raw) in rows {
        let date = parse_date(&raw)
            .ok_or_else(|| anyhow::anyhow!("lesson {} has invalid date {:?}", lesson_id, raw))?;
        out.push(ManualLesson { lesson_id, date });
    }
    Ok(out)
}

/// Lesson dates a student already holds in packages other than `exclude_package`.
pub fn student_booked_dates(
    conn: &Connection,
    student_id: &str,
    exclude_package: Option<&str>,
) -> anyhow::Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT l.lesson_date
         FROM lessons l
         JOIN packages p ON p.id = l.package_id
         WHERE p.student_id = ? AND (? IS NULL OR p.id <> ?)
         ORDER BY l.lesson_date",
    )?;
    let rows = stmt
        .query_map(params![student_id, exclude_package, exclude_package], |r| {
            r.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.iter().filter_map(|s| parse_date(s)).collect())
}

fn ensure_students_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN status TEXT NOT NULL DEFAULT 'active'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
