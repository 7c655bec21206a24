use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn replace_rejects_over_credit_and_keeps_the_stored_grid() {
    let workspace = temp_dir("registrar-capacity-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M4/1" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "name": "Mathematics",
            "credit": 1.0
        }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(first.get("slotCount").and_then(|v| v.as_u64()), Some(1));

    // One credit buys one hour a week; two slots must bounce as a whole.
    let over = request(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id },
                { "dayOfWeek": 2, "period": 1, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(over.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        over.pointer("/error/code").and_then(|v| v.as_str()),
        Some("capacity_exceeded")
    );
    assert_eq!(
        over.pointer("/error/details/subjectName")
            .and_then(|v| v.as_str()),
        Some("Mathematics")
    );
    assert_eq!(
        over.pointer("/error/details/used").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        over.pointer("/error/details/credit").and_then(|v| v.as_f64()),
        Some(1.0)
    );
    assert!(over
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .contains("hours"));

    // The rejected payload must not have touched the stored week.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.getSlots",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "classId": class_id }),
    );
    let stored = slots.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].get("dayOfWeek").and_then(|v| v.as_i64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn replace_allows_hours_equal_to_credit() {
    let workspace = temp_dir("registrar-capacity-equal");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M4/2" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "name": "Physics",
            "credit": 2.0
        }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );

    let at_credit = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 2, "subjectId": subject_id },
                { "dayOfWeek": 3, "period": 2, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(at_credit.get("slotCount").and_then(|v| v.as_u64()), Some(2));

    let over = request(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 2, "subjectId": subject_id },
                { "dayOfWeek": 3, "period": 2, "subjectId": subject_id },
                { "dayOfWeek": 5, "period": 2, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(
        over.pointer("/error/code").and_then(|v| v.as_str()),
        Some("capacity_exceeded")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn duplicate_grid_cells_collapse_to_the_last_entry() {
    let workspace = temp_dir("registrar-capacity-dupes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M5/1" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let math_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Mathematics", "credit": 1.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let thai_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Thai", "credit": 1.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    for (rid, sid) in [("6", math_id), ("7", thai_id)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "offerings.open",
            json!({
                "actor": { "role": "ADMIN", "id": 1 },
                "classId": class_id,
                "subjectId": sid
            }),
        );
    }

    // Two writes to the same cell plus two malformed entries; only the
    // final Thai slot survives.
    let replaced = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 3, "subjectId": math_id },
                { "dayOfWeek": 2, "period": 3 },
                { "note": "placeholder row" },
                { "dayOfWeek": 1, "period": 3, "subjectId": thai_id }
            ]
        }),
    );
    assert_eq!(replaced.get("slotCount").and_then(|v| v.as_u64()), Some(1));

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.getSlots",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "classId": class_id }),
    );
    let stored = slots.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].get("subjectId").and_then(|v| v.as_i64()),
        Some(thai_id)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_cells_still_spend_hours_against_the_credit() {
    let workspace = temp_dir("registrar-capacity-repeat");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M5/3" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Mathematics", "credit": 1.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );

    // Writing the same cell twice still proposes two hours of Mathematics,
    // even though storage would have collapsed them to one slot.
    let over = request(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id },
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(over.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        over.pointer("/error/code").and_then(|v| v.as_str()),
        Some("capacity_exceeded")
    );
    assert_eq!(
        over.pointer("/error/details/used").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        over.pointer("/error/details/credit").and_then(|v| v.as_f64()),
        Some(1.0)
    );

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.getSlots",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "classId": class_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn slots_outside_the_grid_are_rejected_with_the_shape() {
    let workspace = temp_dir("registrar-capacity-grid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.setGrid",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "days": 5,
            "periods": 8,
            "lunchPeriod": 5
        }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M5/2" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "History", "credit": 1.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );

    let saturday = request(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 6, "period": 1, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(
        saturday.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    assert_eq!(
        saturday
            .pointer("/error/details/dayOfWeek")
            .and_then(|v| v.as_i64()),
        Some(6)
    );
    assert_eq!(
        saturday
            .pointer("/error/details/days")
            .and_then(|v| v.as_i64()),
        Some(5)
    );

    let late_period = request(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 9, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(
        late_period.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    assert_eq!(
        late_period
            .pointer("/error/details/periods")
            .and_then(|v| v.as_i64()),
        Some(8)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn shrinking_the_grid_pulls_the_lunch_period_inside() {
    let workspace = temp_dir("registrar-capacity-lunch");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.setGrid",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "days": 5,
            "periods": 8,
            "lunchPeriod": 6
        }),
    );

    // An explicit lunch off the new shape is refused outright.
    let off_grid = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.setGrid",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "days": 5,
            "periods": 4,
            "lunchPeriod": 6
        }),
    );
    assert_eq!(
        off_grid.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    // An omitted lunch carries the stored period 6, pulled onto the
    // four-period week.
    let shrunk = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.setGrid",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "days": 5, "periods": 4 }),
    );
    assert_eq!(shrunk.get("lunchPeriod").and_then(|v| v.as_i64()), Some(4));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.getGrid",
        json!({ "actor": { "role": "ADMIN", "id": 1 } }),
    );
    assert_eq!(grid.get("days").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(grid.get("periods").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(grid.get("lunchPeriod").and_then(|v| v.as_i64()), Some(4));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subjects_without_an_open_offering_reject_the_payload() {
    let workspace = temp_dir("registrar-capacity-unknown");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M6/1" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Biology", "credit": 1.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );

    let stray = request(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id },
                { "dayOfWeek": 2, "period": 1, "subjectId": 999 }
            ]
        }),
    );
    assert_eq!(
        stray.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
    assert_eq!(
        stray
            .pointer("/error/details/subjectId")
            .and_then(|v| v.as_i64()),
        Some(999)
    );

    // Nothing was written, including the valid first slot.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.getSlots",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "classId": class_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // A closed offering no longer admits slots either.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "offerings.close",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id
        }),
    );
    let closed = request(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id }
            ]
        }),
    );
    assert_eq!(
        closed.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn slot_teachers_are_stored_exactly_as_proposed() {
    let workspace = temp_dir("registrar-capacity-teacher");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "term.set",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "year": 2569, "term": 1 }),
    );
    let teacher_a = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Anong" }),
    )
    .get("teacherId")
    .and_then(|v| v.as_i64())
    .expect("teacherId");
    let teacher_b = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Boonmee" }),
    )
    .get("teacherId")
    .and_then(|v| v.as_i64())
    .expect("teacherId");
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "M6/2" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("classId");
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.create",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "name": "Chemistry", "credit": 2.0 }),
    )
    .get("subjectId")
    .and_then(|v| v.as_i64())
    .expect("subjectId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "offerings.open",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "subjectId": subject_id,
            "teacherId": teacher_a
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.replaceSlots",
        json!({
            "actor": { "role": "ADMIN", "id": 1 },
            "classId": class_id,
            "slots": [
                { "dayOfWeek": 1, "period": 1, "subjectId": subject_id },
                { "dayOfWeek": 2, "period": 2, "subjectId": subject_id, "teacherId": teacher_b }
            ]
        }),
    );

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.getSlots",
        json!({ "actor": { "role": "ADMIN", "id": 1 }, "classId": class_id }),
    );
    let stored = slots.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(stored.len(), 2);
    // The offering has a teacher of record; the bare cell still stores none.
    assert!(
        stored[0]
            .get("teacherId")
            .map(|v| v.is_null())
            .unwrap_or(false),
        "bare slot keeps a null teacher"
    );
    assert_eq!(
        stored[1].get("teacherId").and_then(|v| v.as_i64()),
        Some(teacher_b)
    );

    // No slot carries teacher_a, so their week is empty.
    let week_a = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "schedule.forTeacher",
        json!({
            "actor": { "role": "TEACHER", "id": teacher_a },
            "teacherId": teacher_a
        }),
    );
    assert_eq!(
        week_a
            .get("slots")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let week_b = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedule.forTeacher",
        json!({
            "actor": { "role": "TEACHER", "id": teacher_b },
            "teacherId": teacher_b
        }),
    );
    let slots_b = week_b.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(slots_b.len(), 1);
    assert_eq!(
        slots_b[0].get("subjectName").and_then(|v| v.as_str()),
        Some("Chemistry")
    );
    assert_eq!(
        slots_b[0].get("className").and_then(|v| v.as_str()),
        Some("M6/2")
    );

    // A teacher may only open their own week.
    let peeking = request(
        &mut stdin,
        &mut reader,
        "12",
        "schedule.forTeacher",
        json!({
            "actor": { "role": "TEACHER", "id": teacher_b },
            "teacherId": teacher_a
        }),
    );
    assert_eq!(
        peeking.pointer("/error/code").and_then(|v| v.as_str()),
        Some("forbidden")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
