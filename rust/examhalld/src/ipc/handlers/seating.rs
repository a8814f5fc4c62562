use crate::ipc::error::{classify_write_err, ok, HandlerErr};
use crate::ipc::handlers::exams::{load_exam, Exam};
use crate::ipc::handlers::setup::{load_seating_settings, StudentScope};
use crate::ipc::helpers::{
    as_i64_loose, db_conn, optional_bool, optional_i64, optional_str, required_i64,
};
use crate::ipc::types::{AppState, Request};
use crate::seating::{self, Room, SeatingAllocation, Student};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

fn load_roster(
    conn: &Connection,
    exam: &Exam,
    scope: StudentScope,
) -> Result<Vec<Student>, HandlerErr> {
    let (sql, binds): (&str, Vec<Value>) = match scope {
        StudentScope::Cohort => (
            "SELECT id, roll_number, name, department FROM students
             WHERE department = ? AND semester = ?
             ORDER BY roll_number",
            vec![
                Value::Text(exam.department.clone()),
                Value::Integer(exam.semester),
            ],
        ),
        StudentScope::All => (
            "SELECT id, roll_number, name, department FROM students ORDER BY roll_number",
            Vec::new(),
        ),
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(params_from_iter(binds), |r| {
        let department: Option<String> = r.get(3)?;
        let mut s = Student::new(r.get(0)?, department.as_deref());
        s.roll_number = r.get(1)?;
        s.name = r.get(2)?;
        Ok(s)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn load_rooms(conn: &Connection, room_ids: Option<&[i64]>) -> Result<Vec<Room>, HandlerErr> {
    let mut sql = String::from("SELECT id, room_number, capacity, grid_rows, grid_columns FROM rooms");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(ids) = room_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sql.push_str(" WHERE id IN (");
        sql.push_str(&vec!["?"; ids.len()].join(", "));
        sql.push(')');
        binds.extend(ids.iter().map(|id| Value::Integer(*id)));
    }
    sql.push_str(" ORDER BY room_number");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(params_from_iter(binds), |r| {
        let mut room = Room::new(r.get(0)?, r.get(2)?, r.get(3)?, r.get(4)?);
        room.room_number = r.get(1)?;
        Ok(room)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn parse_room_ids(params: &serde_json::Value) -> Result<Option<Vec<i64>>, HandlerErr> {
    match params.get("roomIds") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                as_i64_loose(v)
                    .ok_or_else(|| HandlerErr::new("bad_params", "roomIds must contain integers"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(HandlerErr::new("bad_params", "roomIds must be an array")),
    }
}

/// Counts are stored as SQLite integers; anything past `i64::MAX` saturates.
fn count_to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Audit row kept per exam for the latest generation.
struct RunRecord {
    run_id: String,
    mix_groups: bool,
    student_count: i64,
    allocated_count: i64,
    seat_capacity: i64,
    digest: String,
    generated_at: String,
}

fn write_plan(
    conn: &Connection,
    exam_id: i64,
    allocations: &[SeatingAllocation],
    run: &RunRecord,
) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM seat_allocations WHERE exam_id = ?", [exam_id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "seat_allocations" }))
        })?;
    {
        let mut ins = tx
            .prepare(
                "INSERT INTO seat_allocations(exam_id, student_id, room_id, seat_number, seat_row, seat_col)
                 VALUES(?, ?, ?, ?, ?, ?)",
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        for a in allocations {
            ins.execute((
                exam_id,
                a.student_id,
                a.room_id,
                a.seat_number,
                a.row_number,
                a.column_number,
            ))
            .map_err(|e| {
                classify_write_err("db_insert_failed", e)
                    .with_details(json!({ "table": "seat_allocations", "studentId": a.student_id }))
            })?;
        }
    }
    tx.execute(
        "INSERT INTO seating_runs(exam_id, run_id, mix_groups, student_count, allocated_count, seat_capacity, digest, generated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id) DO UPDATE SET
           run_id = excluded.run_id,
           mix_groups = excluded.mix_groups,
           student_count = excluded.student_count,
           allocated_count = excluded.allocated_count,
           seat_capacity = excluded.seat_capacity,
           digest = excluded.digest,
           generated_at = excluded.generated_at",
        (
            exam_id,
            &run.run_id,
            run.mix_groups,
            run.student_count,
            run.allocated_count,
            run.seat_capacity,
            &run.digest,
            &run.generated_at,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "seating_runs" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))
}

fn generate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam = load_exam(conn, required_i64(req, "examId")?)?;
    let settings =
        load_seating_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mix_groups = optional_bool(&req.params, "mixGroups")?.unwrap_or(settings.default_mix_groups);
    let scope = match optional_str(&req.params, "studentScope")? {
        Some(raw) => StudentScope::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "studentScope must be one of: cohort, all")
        })?,
        None => settings.default_student_scope,
    };
    let room_ids = parse_room_ids(&req.params)?;
    let seed = optional_i64(&req.params, "seed")?;

    let students = load_roster(conn, &exam, scope)?;
    if students.is_empty() {
        return Err(HandlerErr::new("no_students", "no students found for this exam")
            .with_details(json!({ "studentScope": scope.as_str() })));
    }
    let rooms = load_rooms(conn, room_ids.as_deref())?;
    if rooms.is_empty() {
        return Err(HandlerErr::new("no_rooms", "no rooms available for seating"));
    }

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s as u64),
        None => StdRng::from_entropy(),
    };
    let plan = seating::allocate_checked(&students, &rooms, mix_groups, &mut rng)
        .map_err(|e| HandlerErr::new("duplicate_student", e.to_string()))?;

    if !plan.is_complete() && !settings.allow_partial {
        warn!(
            exam_id = exam.id,
            allocated = plan.allocations.len(),
            total = plan.student_count,
            "seating rejected: not enough seats"
        );
        return Err(
            HandlerErr::new("insufficient_capacity", "not enough seats for every student")
                .with_details(json!({
                    "allocated": plan.allocations.len(),
                    "total": plan.student_count
                })),
        );
    }

    let run = RunRecord {
        run_id: Uuid::new_v4().to_string(),
        mix_groups,
        student_count: count_to_i64(plan.student_count),
        allocated_count: count_to_i64(plan.allocations.len()),
        seat_capacity: count_to_i64(plan.seat_capacity),
        digest: seating::allocation_digest(&plan.allocations),
        generated_at: chrono::Utc::now().to_rfc3339(),
    };
    write_plan(conn, exam.id, &plan.allocations, &run)?;

    info!(
        exam_id = exam.id,
        allocated = plan.allocations.len(),
        total = plan.student_count,
        mix_groups,
        "seating generated"
    );
    Ok(json!({
        "runId": run.run_id,
        "allocated": run.allocated_count,
        "total": run.student_count,
        "unallocated": plan.unallocated(),
        "unallocatedStudentIds": plan.unallocated_ids(&students),
        "seatCapacity": run.seat_capacity,
        "mixGroups": mix_groups,
        "digest": run.digest,
        "generatedAt": run.generated_at,
    }))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_id = required_i64(req, "examId")?;
    let include_students = optional_bool(&req.params, "includeStudents")?.unwrap_or(false);
    let include_rooms = optional_bool(&req.params, "includeRooms")?.unwrap_or(false);
    let limit = optional_i64(&req.params, "limit")?;
    if matches!(limit, Some(n) if n < 1) {
        return Err(HandlerErr::new("bad_params", "limit must be >= 1"));
    }

    let mut sql = String::from(
        "SELECT sa.id, sa.student_id, sa.room_id, sa.seat_number, sa.seat_row, sa.seat_col,
                s.roll_number, s.name, s.department,
                r.room_number, r.building, r.floor
         FROM seat_allocations sa
         JOIN students s ON s.id = sa.student_id
         JOIN rooms r ON r.id = sa.room_id
         WHERE sa.exam_id = ?
         ORDER BY r.room_number, sa.seat_number",
    );
    let mut binds = vec![Value::Integer(exam_id)];
    if let Some(n) = limit {
        sql.push_str(" LIMIT ?");
        binds.push(Value::Integer(n));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let allocations = stmt
        .query_map(params_from_iter(binds), |r| {
            let mut a = json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "roomId": r.get::<_, i64>(2)?,
                "seatNumber": r.get::<_, i64>(3)?,
                "row": r.get::<_, Option<i64>>(4)?,
                "column": r.get::<_, Option<i64>>(5)?,
            });
            if include_students {
                a["student"] = json!({
                    "rollNumber": r.get::<_, String>(6)?,
                    "name": r.get::<_, String>(7)?,
                    "department": r.get::<_, Option<String>>(8)?,
                });
            }
            if include_rooms {
                a["room"] = json!({
                    "roomNumber": r.get::<_, String>(9)?,
                    "building": r.get::<_, Option<String>>(10)?,
                    "floor": r.get::<_, Option<i64>>(11)?,
                });
            }
            Ok(a)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "examId": exam_id, "allocations": allocations }))
}

struct ManualSeat {
    student_id: i64,
    room_id: i64,
    seat_number: i64,
    row: Option<i64>,
    column: Option<i64>,
}

fn parse_manual_seat(idx: usize, v: &serde_json::Value) -> Result<ManualSeat, HandlerErr> {
    let at = |msg: &str| {
        HandlerErr::new("bad_params", format!("allocations[{}]: {}", idx, msg))
            .with_details(json!({ "index": idx }))
    };
    if !v.is_object() {
        return Err(at("must be an object"));
    }
    let field = |key: &str| {
        v.get(key)
            .and_then(as_i64_loose)
            .ok_or_else(|| at(&format!("missing {}", key)))
    };
    let seat = ManualSeat {
        student_id: field("studentId")?,
        room_id: field("roomId")?,
        seat_number: field("seatNumber")?,
        row: optional_i64(v, "row").map_err(|_| at("row must be an integer"))?,
        column: optional_i64(v, "column").map_err(|_| at("column must be an integer"))?,
    };
    if seat.seat_number < 1 {
        return Err(at("seatNumber must be >= 1"));
    }
    Ok(seat)
}

fn save(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_id = required_i64(req, "examId")?;
    load_exam(conn, exam_id)?;
    let Some(items) = req.params.get("allocations").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "allocations must be an array"));
    };
    let seats = items
        .iter()
        .enumerate()
        .map(|(i, v)| parse_manual_seat(i, v))
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (idx, s) in seats.iter().enumerate() {
        let capacity: Option<i64> = tx
            .query_row("SELECT capacity FROM rooms WHERE id = ?", [s.room_id], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        match capacity {
            None => {
                return Err(HandlerErr::new("not_found", "room not found")
                    .with_details(json!({ "index": idx, "roomId": s.room_id })))
            }
            Some(cap) if s.seat_number > cap => {
                return Err(HandlerErr::new("bad_params", "seatNumber exceeds room capacity")
                    .with_details(json!({ "index": idx, "capacity": cap })))
            }
            Some(_) => {}
        }
        let student: Option<i64> = tx
            .query_row("SELECT id FROM students WHERE id = ?", [s.student_id], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if student.is_none() {
            return Err(HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "index": idx, "studentId": s.student_id })));
        }
        tx.execute(
            "INSERT INTO seat_allocations(exam_id, student_id, room_id, seat_number, seat_row, seat_col)
             VALUES(?, ?, ?, ?, ?, ?)",
            (exam_id, s.student_id, s.room_id, s.seat_number, s.row, s.column),
        )
        .map_err(|e| classify_write_err("db_insert_failed", e).with_details(json!({ "index": idx })))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "saved": seats.len() }))
}

fn clear(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_id = required_i64(req, "examId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let deleted = tx
        .execute("DELETE FROM seat_allocations WHERE exam_id = ?", [exam_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM seating_runs WHERE exam_id = ?", [exam_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "deleted": deleted }))
}

fn last_run(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_id = required_i64(req, "examId")?;
    conn.query_row(
        "SELECT run_id, mix_groups, student_count, allocated_count, seat_capacity, digest, generated_at
         FROM seating_runs WHERE exam_id = ?",
        [exam_id],
        |r| {
            let total: i64 = r.get(2)?;
            let allocated: i64 = r.get(3)?;
            Ok(json!({
                "examId": exam_id,
                "runId": r.get::<_, String>(0)?,
                "mixGroups": r.get::<_, bool>(1)?,
                "total": total,
                "allocated": allocated,
                "unallocated": (total - allocated).max(0),
                "seatCapacity": r.get::<_, i64>(4)?,
                "digest": r.get::<_, String>(5)?,
                "generatedAt": r.get::<_, String>(6)?,
            }))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "no seating run recorded for this exam"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "seating.generate" => generate(state, req),
        "seating.list" => list(state, req),
        "seating.save" => save(state, req),
        "seating.clear" => clear(state, req),
        "seating.run" => last_run(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
