mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_persist_and_validate() {
    let workspace = temp_dir("examhall-setup-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(defaults["seating"]["defaultMixGroups"].as_bool(), Some(true));
    assert_eq!(defaults["seating"]["allowPartial"].as_bool(), Some(true));
    assert_eq!(defaults["seating"]["defaultStudentScope"].as_str(), Some("cohort"));
    assert_eq!(defaults["reports"]["showGeneratedAt"].as_bool(), Some(true));
    assert_eq!(defaults["reports"]["roomOrder"].as_str(), Some("roomNumber"));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "seating",
            "patch": { "defaultMixGroups": false, "defaultStudentScope": "ALL" }
        }),
    );

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "seating", "patch": { "allowPartial": "no" } }),
    );
    assert_eq!(error_code(&bad_type), "bad_params");
    let bad_field = request(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "reports", "patch": { "pageSize": "A4" } }),
    );
    assert_eq!(error_code(&bad_field), "bad_params");
    let bad_section = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "planner", "patch": {} }),
    );
    assert_eq!(error_code(&bad_section), "bad_params");

    // Settings survive a fresh process on the same workspace.
    let _ = child.kill();
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let saved = request_ok(&mut stdin, &mut reader, "8", "setup.get", json!({}));
    assert_eq!(saved["seating"]["defaultMixGroups"].as_bool(), Some(false));
    assert_eq!(saved["seating"]["defaultStudentScope"].as_str(), Some("all"));
    assert_eq!(saved["seating"]["allowPartial"].as_bool(), Some(true));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn seating_uses_configured_scope_when_request_is_silent() {
    let workspace = temp_dir("examhall-setup-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rooms.create",
        json!({ "roomNumber": "H-1", "capacity": 10 }),
    );
    for (i, dept) in ["CS", "EE", "EE"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "rollNumber": format!("R{}", i), "name": "n", "department": dept, "semester": 4 }),
        );
    }
    let exam_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.create",
        json!({
            "courseCode": "EE401",
            "courseName": "Signals",
            "examDate": "2026-11-12",
            "examTime": "11:00",
            "department": "EE",
            "semester": 4
        }),
    )["examId"]
        .as_i64()
        .expect("examId");

    let cohort = request_ok(&mut stdin, &mut reader, "4", "seating.generate", json!({ "examId": exam_id }));
    assert_eq!(cohort["total"].as_i64(), Some(2));
    assert_eq!(cohort["mixGroups"].as_bool(), Some(true));

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "seating", "patch": { "defaultStudentScope": "all", "defaultMixGroups": false } }),
    );
    let all = request_ok(&mut stdin, &mut reader, "6", "seating.generate", json!({ "examId": exam_id, "seed": 5 }));
    assert_eq!(all["total"].as_i64(), Some(3));
    assert_eq!(all["mixGroups"].as_bool(), Some(false));

    let bad_scope = request(
        &mut stdin,
        &mut reader,
        "7",
        "seating.generate",
        json!({ "examId": exam_id, "studentScope": "everyone" }),
    );
    assert_eq!(error_code(&bad_scope), "bad_params");

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
