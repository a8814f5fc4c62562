mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, spawn_sidecar, temp_dir};

fn not_unknown(value: &serde_json::Value, method: &str) {
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value["error"]["code"].as_str().unwrap_or("unknown");
        assert_ne!(code, "not_implemented", "unexpected unknown method for {}", method);
    }
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("examhall-router-smoke");
    let restore_dir = temp_dir("examhall-router-smoke-restore");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_out = workspace.join("smoke-export.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["result"]["workspacePath"].is_null());

    let before = request(&mut stdin, &mut reader, "1a", "students.create", json!({ "rollNumber": "X", "name": "Y" }));
    assert_eq!(error_code(&before), "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "rollNumber": "SM001", "name": "Smoke Student", "department": "CS", "semester": 2 }),
    );
    let student_id = student["result"]["studentId"].as_i64().expect("studentId");
    let room = request(
        &mut stdin,
        &mut reader,
        "4",
        "rooms.create",
        json!({ "roomNumber": "SM-1", "capacity": 10, "rows": 2, "columns": 5 }),
    );
    let room_id = room["result"]["roomId"].as_i64().expect("roomId");
    let exam = request(
        &mut stdin,
        &mut reader,
        "5",
        "exams.create",
        json!({
            "courseCode": "SM100",
            "courseName": "Smoke",
            "examDate": "2026-10-30",
            "examTime": "08:00",
            "department": "CS",
            "semester": 2
        }),
    );
    let exam_id = exam["result"]["examId"].as_i64().expect("examId");

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("stats.get", json!({})),
        ("setup.get", json!({})),
        ("students.list", json!({ "department": "CS" })),
        ("students.update", json!({ "studentId": student_id, "patch": { "email": "s@x.test" } })),
        ("students.importCsv", json!({ "text": "rollNumber,name\nSM002,Second" })),
        ("rooms.list", json!({})),
        ("rooms.update", json!({ "roomId": room_id, "patch": { "building": "Main" } })),
        ("exams.list", json!({})),
        ("exams.get", json!({ "examId": exam_id })),
        ("seating.generate", json!({ "examId": exam_id, "seed": 1 })),
        ("seating.list", json!({ "examId": exam_id, "limit": 1 })),
        ("seating.run", json!({ "examId": exam_id })),
        ("seating.save", json!({ "examId": exam_id, "allocations": [] })),
        ("reports.roomWise", json!({ "examId": exam_id })),
        ("reports.studentWise", json!({ "examId": exam_id })),
        ("reports.seatChart", json!({ "examId": exam_id, "roomId": room_id })),
        ("exchange.exportRoomWiseCsv", json!({ "examId": exam_id, "outPath": csv_out.to_string_lossy() })),
        ("exchange.exportStudentWiseCsv", json!({ "examId": exam_id, "outPath": csv_out.to_string_lossy() })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
        ("seating.clear", json!({ "examId": exam_id })),
        ("rooms.delete", json!({ "roomId": room_id })),
        ("students.delete", json!({ "studentId": student_id })),
        ("exams.delete", json!({ "examId": exam_id })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("c{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, params);
        not_unknown(&resp, method);
        assert_eq!(resp["ok"].as_bool(), Some(true), "{} failed: {}", method, resp);
    }

    let restored = request(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy(), "workspacePath": restore_dir.to_string_lossy() }),
    );
    assert_eq!(restored["result"]["bundleFormatDetected"].as_str(), Some("examhall-workspace-v1"));
    // The restored copy predates the deletes above.
    let stats = request(&mut stdin, &mut reader, "7", "stats.get", json!({}));
    assert_eq!(stats["result"]["totalRooms"].as_i64(), Some(1));
    assert_eq!(stats["result"]["totalExams"].as_i64(), Some(1));

    let unknown = request(&mut stdin, &mut reader, "8", "nope.method", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("bad_json reply is json");
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_json"));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restore_dir);
}
