use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::exams::{load_exam, Exam};
use crate::ipc::handlers::rooms::MAX_GRID_DIMENSION;
use crate::ipc::handlers::setup::{load_report_settings, RoomOrder};
use crate::ipc::helpers::{db_conn, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::seating::seat_position;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::cmp::Reverse;

/// One seated student, joined with its room, as every report sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRow {
    pub room_id: i64,
    pub room_number: String,
    pub building: Option<String>,
    pub capacity: i64,
    pub seat_number: i64,
    pub row: Option<i64>,
    pub column: Option<i64>,
    pub student_id: i64,
    pub roll_number: String,
    pub name: String,
    pub department: Option<String>,
}

pub fn load_seat_rows(conn: &Connection, exam_id: i64) -> Result<Vec<SeatRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.room_number, r.building, r.capacity,
                    sa.seat_number, sa.seat_row, sa.seat_col,
                    s.id, s.roll_number, s.name, s.department
             FROM seat_allocations sa
             JOIN rooms r ON r.id = sa.room_id
             JOIN students s ON s.id = sa.student_id
             WHERE sa.exam_id = ?
             ORDER BY r.room_number, sa.seat_number",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([exam_id], |r| {
        Ok(SeatRow {
            room_id: r.get(0)?,
            room_number: r.get(1)?,
            building: r.get(2)?,
            capacity: r.get(3)?,
            seat_number: r.get(4)?,
            row: r.get(5)?,
            column: r.get(6)?,
            student_id: r.get(7)?,
            roll_number: r.get(8)?,
            name: r.get(9)?,
            department: r.get(10)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Seat rows grouped per room, rooms in the requested order.
pub fn group_by_room(rows: Vec<SeatRow>, order: RoomOrder) -> Vec<(SeatRow, Vec<SeatRow>)> {
    let mut groups: Vec<(SeatRow, Vec<SeatRow>)> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some((head, seats)) if head.room_id == row.room_id => seats.push(row),
            _ => groups.push((row.clone(), vec![row])),
        }
    }
    if order == RoomOrder::Allocation {
        // Rows arrive by room number, so the stable sort keeps that as the tie-break.
        groups.sort_by_key(|(head, _)| Reverse(head.capacity));
    }
    groups
}

fn exam_header(conn: &Connection, exam: &Exam) -> Result<serde_json::Value, HandlerErr> {
    let settings =
        load_report_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut header = json!({ "exam": exam });
    if settings.show_generated_at {
        header["generatedAt"] = json!(chrono::Utc::now().to_rfc3339());
    }
    Ok(header)
}

fn seat_json(s: &SeatRow) -> serde_json::Value {
    json!({
        "seatNumber": s.seat_number,
        "row": s.row,
        "column": s.column,
        "rollNumber": s.roll_number,
        "name": s.name,
        "department": s.department,
    })
}

fn room_wise(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let order = load_report_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .room_order;

    let rows = load_seat_rows(conn, exam.id)?;
    let total = rows.len();
    let rooms: Vec<serde_json::Value> = group_by_room(rows, order)
        .into_iter()
        .map(|(head, seats)| {
            json!({
                "roomId": head.room_id,
                "roomNumber": head.room_number,
                "building": head.building,
                "capacity": head.capacity,
                "seatCount": seats.len(),
                "seats": seats.iter().map(seat_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut out = exam_header(conn, &exam)?;
    out["totalSeated"] = json!(total);
    out["rooms"] = json!(rooms);
    Ok(out)
}

fn student_wise(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let mut rows = load_seat_rows(conn, exam.id)?;
    rows.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));

    let students: Vec<serde_json::Value> = rows
        .iter()
        .map(|s| {
            json!({
                "studentId": s.student_id,
                "rollNumber": s.roll_number,
                "name": s.name,
                "department": s.department,
                "roomNumber": s.room_number,
                "building": s.building,
                "seatNumber": s.seat_number,
                "row": s.row,
                "column": s.column,
            })
        })
        .collect();

    let mut out = exam_header(conn, &exam)?;
    out["students"] = json!(students);
    Ok(out)
}

/// Grid placement for a seat: stored coordinates win, otherwise row-major.
fn chart_position(s: &SeatRow, columns: i64) -> (i64, i64) {
    match (s.row, s.column) {
        (Some(r), Some(c)) => (r, c),
        _ => seat_position(s.seat_number, columns),
    }
}

fn seat_chart(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let room_id = required_i64(req, "roomId")?;
    let (room_number, capacity, rows, columns): (String, i64, Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT room_number, capacity, grid_rows, grid_columns FROM rooms WHERE id = ?",
            [room_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "room not found"))?;

    let seats: Vec<SeatRow> = load_seat_rows(conn, exam.id)?
        .into_iter()
        .filter(|s| s.room_id == room_id)
        .collect();

    let mut out = json!({
        "examId": exam.id,
        "roomId": room_id,
        "roomNumber": room_number,
        "capacity": capacity,
        "rows": rows,
        "columns": columns,
    });

    match (rows, columns) {
        // Grids stored before the dimension cap (or restored from a bundle) render flat.
        (Some(nr), Some(nc))
            if (1..=MAX_GRID_DIMENSION).contains(&nr) && (1..=MAX_GRID_DIMENSION).contains(&nc) =>
        {
            let mut grid = vec![vec![serde_json::Value::Null; nc as usize]; nr as usize];
            let mut overflow = Vec::new();
            for s in &seats {
                let (r, c) = chart_position(s, nc);
                if (1..=nr).contains(&r) && (1..=nc).contains(&c) {
                    grid[(r - 1) as usize][(c - 1) as usize] = json!(s.roll_number);
                } else {
                    overflow.push(seat_json(s));
                }
            }
            out["layout"] = json!("grid");
            out["grid"] = json!(grid);
            out["overflow"] = json!(overflow);
        }
        _ => {
            out["layout"] = json!("flat");
            out["seats"] = json!(seats.iter().map(seat_json).collect::<Vec<_>>());
        }
    }
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.roomWise" => room_wise(state, req),
        "reports.studentWise" => student_wise(state, req),
        "reports.seatChart" => seat_chart(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
