use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_i64, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: i64,
    pub course_code: String,
    pub course_name: String,
    pub exam_date: String,
    pub exam_time: String,
    pub department: String,
    pub semester: i64,
    pub duration_minutes: i64,
}

const EXAM_COLUMNS: &str =
    "id, course_code, course_name, exam_date, exam_time, department, semester, duration_minutes";

fn exam_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Exam> {
    Ok(Exam {
        id: row.get(0)?,
        course_code: row.get(1)?,
        course_name: row.get(2)?,
        exam_date: row.get(3)?,
        exam_time: row.get(4)?,
        department: row.get(5)?,
        semester: row.get(6)?,
        duration_minutes: row.get(7)?,
    })
}

pub fn load_exam(conn: &Connection, exam_id: i64) -> Result<Exam, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM exams WHERE id = ?", EXAM_COLUMNS),
        [exam_id],
        exam_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "exam not found"))
}

fn parse_exam_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::new("bad_params", "examDate must be YYYY-MM-DD"))
}

/// Stored as HH:MM; seconds are accepted and dropped.
fn parse_exam_time(raw: &str) -> Result<String, HandlerErr> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| HandlerErr::new("bad_params", "examTime must be HH:MM"))
}

fn list_exams(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "exams": [] }));
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM exams ORDER BY exam_date, exam_time, id",
            EXAM_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let exams = stmt
        .query_map([], exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "exams": exams }))
}

fn get_exam(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    Ok(json!({ "exam": exam }))
}

fn create_exam(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_code = required_str(req, "courseCode")?;
    let course_name = required_str(req, "courseName")?;
    let exam_date = parse_exam_date(&required_str(req, "examDate")?)?;
    let exam_time = parse_exam_time(&required_str(req, "examTime")?)?;
    let department = required_str(req, "department")?;
    let semester = required_i64(req, "semester")?;
    let duration_minutes = optional_i64(&req.params, "durationMinutes")?.unwrap_or(180);
    if duration_minutes < 1 {
        return Err(HandlerErr::new("bad_params", "durationMinutes must be >= 1"));
    }

    conn.execute(
        "INSERT INTO exams(course_code, course_name, exam_date, exam_time, department, semester, duration_minutes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &course_code,
            &course_name,
            &exam_date,
            &exam_time,
            &department,
            semester,
            duration_minutes,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "exams" })))?;

    Ok(json!({ "examId": conn.last_insert_rowid() }))
}

fn delete_exam(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_id = required_i64(req, "examId")?;
    load_exam(conn, exam_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for table in ["seat_allocations", "seating_runs"] {
        tx.execute(&format!("DELETE FROM {} WHERE exam_id = ?", table), [exam_id])
            .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table })))?;
    }
    tx.execute("DELETE FROM exams WHERE id = ?", [exam_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "exams" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.list" => list_exams(state),
        "exams.get" => get_exam(state, req),
        "exams.create" => create_exam(state, req),
        "exams.delete" => delete_exam(state, req),
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
    fn exam_time_accepts_seconds_and_normalizes() {
        assert_eq!(parse_exam_time("09:30").unwrap(), "09:30");
        assert_eq!(parse_exam_time("14:05:00").unwrap(), "14:05");
        assert!(parse_exam_time("25:00").is_err());
    }

    #[test]
    fn exam_date_must_be_iso() {
        assert_eq!(parse_exam_date("2026-11-03").unwrap(), "2026-11-03");
        assert!(parse_exam_date("03/11/2026").is_err());
        assert!(parse_exam_date("2026-02-30").is_err());
    }
}
