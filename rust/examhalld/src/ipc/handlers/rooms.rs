use crate::ipc::error::{classify_write_err, ok, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;

fn room_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "roomNumber": row.get::<_, String>(1)?,
        "building": row.get::<_, Option<String>>(2)?,
        "floor": row.get::<_, Option<i64>>(3)?,
        "capacity": row.get::<_, i64>(4)?,
        "rows": row.get::<_, Option<i64>>(5)?,
        "columns": row.get::<_, Option<i64>>(6)?,
    }))
}

/// Upper bound for either grid dimension; seat charts materialize the full grid.
pub const MAX_GRID_DIMENSION: i64 = 500;

/// Grid dimensions are optional, but when given they must lie in
/// `1..=MAX_GRID_DIMENSION`. They are not compared with capacity: a logical
/// grid may be larger or smaller.
fn grid_dimension(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match optional_i64(params, key)? {
        Some(n) if !(1..=MAX_GRID_DIMENSION).contains(&n) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be between 1 and {} when provided", key, MAX_GRID_DIMENSION),
        )
        .with_details(json!({ "field": key, "max": MAX_GRID_DIMENSION }))),
        other => Ok(other),
    }
}

fn list_rooms(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "rooms": [] }));
    };
    let mut stmt = conn
        .prepare(
            "SELECT id, room_number, building, floor, capacity, grid_rows, grid_columns
             FROM rooms
             ORDER BY room_number",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rooms = stmt
        .query_map([], room_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "rooms": rooms }))
}

fn create_room(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let room_number = required_str(req, "roomNumber")?;
    let capacity = required_i64(req, "capacity")?;
    if capacity < 1 {
        return Err(HandlerErr::new("bad_params", "capacity must be >= 1"));
    }
    let building = optional_str(&req.params, "building")?;
    let floor = optional_i64(&req.params, "floor")?;
    let rows = grid_dimension(&req.params, "rows")?;
    let columns = grid_dimension(&req.params, "columns")?;

    conn.execute(
        "INSERT INTO rooms(room_number, building, floor, capacity, grid_rows, grid_columns, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &room_number,
            &building,
            floor,
            capacity,
            rows,
            columns,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| classify_write_err("db_insert_failed", e).with_details(json!({ "table": "rooms" })))?;

    Ok(json!({ "roomId": conn.last_insert_rowid(), "roomNumber": room_number }))
}

fn update_room(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let room_id = required_i64(req, "roomId")?;
    let patch = req
        .params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "patch must be an object"))?;

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if patch.get("roomNumber").is_some() {
        let v = optional_str(patch, "roomNumber")?
            .ok_or_else(|| HandlerErr::new("bad_params", "roomNumber must not be empty"))?;
        sets.push("room_number = ?");
        binds.push(Value::Text(v));
    }
    if patch.get("building").is_some() {
        sets.push("building = ?");
        binds.push(optional_str(patch, "building")?.map_or(Value::Null, Value::Text));
    }
    if patch.get("floor").is_some() {
        sets.push("floor = ?");
        binds.push(optional_i64(patch, "floor")?.map_or(Value::Null, Value::Integer));
    }
    if patch.get("capacity").is_some() {
        match optional_i64(patch, "capacity")? {
            Some(n) if n >= 1 => {
                sets.push("capacity = ?");
                binds.push(Value::Integer(n));
            }
            _ => return Err(HandlerErr::new("bad_params", "capacity must be >= 1")),
        }
    }
    for (key, set) in [("rows", "grid_rows = ?"), ("columns", "grid_columns = ?")] {
        if patch.get(key).is_some() {
            sets.push(set);
            binds.push(grid_dimension(patch, key)?.map_or(Value::Null, Value::Integer));
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::new("bad_params", "patch has no known fields"));
    }

    binds.push(Value::Integer(room_id));
    let changed = conn
        .execute(
            &format!("UPDATE rooms SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(binds),
        )
        .map_err(|e| classify_write_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "room not found"));
    }
    Ok(json!({ "ok": true }))
}

fn delete_room(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let room_id = required_i64(req, "roomId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let released = tx
        .execute("DELETE FROM seat_allocations WHERE room_id = ?", [room_id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "seat_allocations" }))
        })?;
    let removed = tx
        .execute("DELETE FROM rooms WHERE id = ?", [room_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "rooms" })))?;
    if removed == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::new("not_found", "room not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "releasedSeats": released }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rooms.list" => list_rooms(state),
        "rooms.create" => create_room(state, req),
        "rooms.update" => update_room(state, req),
        "rooms.delete" => delete_room(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
