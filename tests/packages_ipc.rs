mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{lesson_dates, lesson_numbers, open_workspace, request_err, request_ok, str_field};

/// Creates a Monday student starting 2024-01-01 and returns (studentId, packageId).
fn monday_student(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> (String, String) {
    let created = request_ok(
        stdin,
        reader,
        "student",
        "students.create",
        json!({ "name": "Mina", "lessonDay1": 0, "packageSize": 4, "startDate": "2024-01-01" }),
    );
    (str_field(&created, "studentId"), str_field(&created, "packageId"))
}

fn lesson_id_on(package: &serde_json::Value, date: &str) -> String {
    package
        .get("lessons")
        .and_then(|v| v.as_array())
        .expect("lessons")
        .iter()
        .find(|l| l.get("lessonDate").and_then(|v| v.as_str()) == Some(date))
        .map(|l| str_field(l, "lessonId"))
        .unwrap_or_else(|| panic!("no lesson on {} in {}", date, package))
}

#[test]
fn moved_lesson_is_pinned_and_survives_regeneration() {
    let (_child, mut stdin, mut reader) = open_workspace("tuitiond-packages-regen");
    let (_student_id, package_id) = monday_student(&mut stdin, &mut reader);

    let package = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "packages.get",
        json!({ "packageId": package_id }),
    );
    let moved_id = lesson_id_on(&package, "2024-01-08");

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "lessons.update",
        json!({ "lessonId": moved_id, "patch": { "lessonDate": "2024-01-10" } }),
    );
    assert_eq!(moved.get("isManualOverride").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(moved.get("lessonNumber").and_then(|v| v.as_i64()), Some(2));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "closures.create",
        json!({ "startDate": "2024-01-15", "endDate": "2024-01-15", "reason": "Staff day" }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "packages.regenerate",
        json!({ "packageId": package_id, "preview": true }),
    );
    assert_eq!(preview.get("committed").and_then(|v| v.as_bool()), Some(false));
    let proposed = preview.get("proposedLessons").expect("proposedLessons");
    assert_eq!(
        lesson_dates(proposed),
        vec!["2024-01-01", "2024-01-08", "2024-01-10", "2024-01-22"]
    );
    assert_eq!(lesson_numbers(proposed), vec![1, 2, 3, 4]);
    assert_eq!(
        proposed[2].get("lessonId").and_then(|v| v.as_str()),
        Some(moved_id.as_str())
    );
    assert_eq!(
        preview
            .get("skippedClosures")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // Preview leaves the stored lessons untouched.
    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "packages.get",
        json!({ "packageId": package_id }),
    );
    assert_eq!(
        lesson_dates(unchanged.get("lessons").expect("lessons")),
        vec!["2024-01-01", "2024-01-10", "2024-01-15", "2024-01-22"]
    );

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "packages.regenerate",
        json!({ "packageId": package_id }),
    );
    assert_eq!(committed.get("committed").and_then(|v| v.as_bool()), Some(true));
    let stored = committed
        .get("package")
        .and_then(|p| p.get("lessons"))
        .expect("package lessons");
    assert_eq!(
        lesson_dates(stored),
        vec!["2024-01-01", "2024-01-08", "2024-01-10", "2024-01-22"]
    );
    assert_eq!(lesson_id_on(committed.get("package").expect("package"), "2024-01-10"), moved_id);

    // Regenerating again with nothing changed is a no-op on dates.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "packages.regenerate",
        json!({ "packageId": package_id }),
    );
    assert_eq!(
        lesson_dates(again.get("proposedLessons").expect("proposedLessons")),
        vec!["2024-01-01", "2024-01-08", "2024-01-10", "2024-01-22"]
    );
}

#[test]
fn lesson_update_rejects_clashes_and_unknown_ids() {
    let (_child, mut stdin, mut reader) = open_workspace("tuitiond-packages-lessons");
    let (_student_id, package_id) = monday_student(&mut stdin, &mut reader);
    let package = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "packages.get",
        json!({ "packageId": package_id }),
    );
    let lesson_id = lesson_id_on(&package, "2024-01-08");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "lessons.update",
        json!({ "lessonId": lesson_id, "patch": { "lessonDate": "2024-01-15" } }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "lessons.update",
        json!({ "lessonId": "missing", "patch": { "lessonDate": "2024-01-09" } }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.update",
        json!({ "lessonId": lesson_id, "patch": { "room": "B" } }),
    );
    assert_eq!(code, "bad_params");

    // Moving with an explicit false keeps the lesson regenerable.
    let unpinned = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "lessons.update",
        json!({
            "lessonId": lesson_id,
            "patch": { "lessonDate": "2024-01-30", "isManualOverride": false }
        }),
    );
    assert_eq!(unpinned.get("isManualOverride").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(unpinned.get("lessonNumber").and_then(|v| v.as_i64()), Some(4));
}

#[test]
fn makeup_lessons_extend_the_package() {
    let (_child, mut stdin, mut reader) = open_workspace("tuitiond-packages-makeup");
    let (_student_id, package_id) = monday_student(&mut stdin, &mut reader);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "packages.addMakeup",
        json!({ "packageId": package_id, "lessonDate": "2024-01-03" }),
    );
    let makeup_id = str_field(&added, "lessonId");
    let lessons = added
        .get("package")
        .and_then(|p| p.get("lessons"))
        .expect("lessons");
    assert_eq!(
        lesson_dates(lessons),
        vec!["2024-01-01", "2024-01-03", "2024-01-08", "2024-01-15", "2024-01-22"]
    );
    assert_eq!(lesson_numbers(lessons), vec![1, 2, 3, 4, 5]);
    assert_eq!(lesson_id_on(added.get("package").expect("package"), "2024-01-03"), makeup_id);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "packages.addMakeup",
        json!({ "packageId": package_id, "lessonDate": "2024-01-15" }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "packages.addMakeup",
        json!({ "packageId": "nope", "lessonDate": "2024-01-16" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn payment_flag_and_follow_on_packages() {
    let (_child, mut stdin, mut reader) = open_workspace("tuitiond-packages-create");
    let (student_id, package_id) = monday_student(&mut stdin, &mut reader);

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "packages.setPaid",
        json!({ "packageId": package_id, "paid": true }),
    );
    assert_eq!(paid.get("paymentStatus").and_then(|v| v.as_bool()), Some(true));
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "packages.get",
        json!({ "packageId": package_id }),
    );
    assert_eq!(fetched.get("paymentStatus").and_then(|v| v.as_bool()), Some(true));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "packages.setPaid",
        json!({ "packageId": package_id }),
    );
    assert_eq!(code, "bad_params");

    // The next package picks up after the last booked lesson.
    let next = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "packages.create",
        json!({ "studentId": student_id }),
    );
    let package = next.get("package").expect("package");
    assert_eq!(str_field(package, "anchorDate"), "2024-01-23");
    assert_eq!(
        lesson_dates(package.get("lessons").expect("lessons")),
        vec!["2024-01-29", "2024-02-05", "2024-02-12", "2024-02-19"]
    );
    assert_eq!(package.get("paymentStatus").and_then(|v| v.as_bool()), Some(false));

    let explicit = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "packages.create",
        json!({ "studentId": student_id, "startFrom": "2024-06-03" }),
    );
    assert_eq!(
        lesson_dates(
            explicit
                .get("package")
                .and_then(|p| p.get("lessons"))
                .expect("lessons")
        ),
        vec!["2024-06-03", "2024-06-10", "2024-06-17", "2024-06-24"]
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        student
            .get("packages")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(3)
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "packages.create",
        json!({ "studentId": "ghost" }),
    );
    assert_eq!(code, "not_found");
}
