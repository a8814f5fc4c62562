use crate::backup;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::exams::load_exam;
use crate::ipc::handlers::reports::{group_by_room, load_seat_rows, SeatRow};
use crate::ipc::handlers::setup::load_report_settings;
use crate::ipc::helpers::{csv_line, db_conn, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

fn opt_text<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn resolve_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    optional_str(&req.params, "workspacePath")?
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn export_workspace_bundle(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out_path = required_str(req, "outPath")?;
    let workspace_path = resolve_workspace(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, Path::new(&out_path)).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    info!(path = %out_path, "workspace bundle exported");

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

fn import_workspace_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let in_path = required_str(req, "inPath")?;
    let workspace_path = resolve_workspace(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = backup::import_workspace_bundle(&src, &workspace_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    state
        .open_workspace(&workspace_path)
        .map_err(|e| HandlerErr::new("db_open_failed", e.to_string()))?;
    info!(workspace = %workspace_path.display(), format = %import.bundle_format_detected, "workspace bundle imported");

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected
    }))
}

fn write_csv(out_path: &str, text: &str) -> Result<(), HandlerErr> {
    let path = Path::new(out_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;
    }
    std::fs::write(path, text).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })
}

pub fn room_wise_csv(groups: &[(SeatRow, Vec<SeatRow>)]) -> String {
    let mut out = csv_line(&[
        "Room".into(),
        "Building".into(),
        "Seat".into(),
        "Row".into(),
        "Column".into(),
        "Roll Number".into(),
        "Name".into(),
        "Department".into(),
    ]);
    for (_, seats) in groups {
        for s in seats {
            out.push_str(&csv_line(&[
                s.room_number.clone(),
                opt_text(s.building.as_deref()),
                s.seat_number.to_string(),
                opt_text(s.row),
                opt_text(s.column),
                s.roll_number.clone(),
                s.name.clone(),
                opt_text(s.department.as_deref()),
            ]));
        }
    }
    out
}

pub fn student_wise_csv(rows: &[SeatRow]) -> String {
    let mut out = csv_line(&[
        "Roll Number".into(),
        "Name".into(),
        "Department".into(),
        "Room".into(),
        "Seat".into(),
        "Row".into(),
        "Column".into(),
    ]);
    for s in rows {
        out.push_str(&csv_line(&[
            s.roll_number.clone(),
            s.name.clone(),
            opt_text(s.department.as_deref()),
            s.room_number.clone(),
            s.seat_number.to_string(),
            opt_text(s.row),
            opt_text(s.column),
        ]));
    }
    out
}

fn export_room_wise_csv(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let out_path = required_str(req, "outPath")?;
    let order = load_report_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .room_order;

    let rows = load_seat_rows(conn, exam.id)?;
    let row_count = rows.len();
    let groups = group_by_room(rows, order);
    write_csv(&out_path, &room_wise_csv(&groups))?;

    Ok(json!({ "ok": true, "path": out_path, "rowsExported": row_count, "rooms": groups.len() }))
}

fn export_student_wise_csv(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let out_path = required_str(req, "outPath")?;

    let mut rows = load_seat_rows(conn, exam.id)?;
    rows.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));
    write_csv(&out_path, &student_wise_csv(&rows))?;

    Ok(json!({ "ok": true, "path": out_path, "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => export_workspace_bundle(state, req),
        "backup.importWorkspaceBundle" => import_workspace_bundle(state, req),
        "exchange.exportRoomWiseCsv" => export_room_wise_csv(state, req),
        "exchange.exportStudentWiseCsv" => export_student_wise_csv(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_csv_leaves_missing_coordinates_blank() {
        let rows = vec![SeatRow {
            room_id: 1,
            room_number: "A-101".into(),
            building: Some("Main, East".into()),
            capacity: 30,
            seat_number: 4,
            row: None,
            column: None,
            student_id: 9,
            roll_number: "21CS009".into(),
            name: "Asha".into(),
            department: None,
        }];
        let text = student_wise_csv(&rows);
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Roll Number,Name,Department,Room,Seat,Row,Column")
        );
        assert_eq!(lines.next(), Some("21CS009,Asha,,A-101,4,,"));

        let groups = vec![(rows[0].clone(), rows)];
        let room_text = room_wise_csv(&groups);
        assert!(room_text.contains("A-101,\"Main, East\",4,,,21CS009,Asha,\n"));
    }
}
