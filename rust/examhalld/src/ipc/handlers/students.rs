use crate::ipc::error::{classify_write_err, ok, HandlerErr};
use crate::ipc::helpers::{
    db_conn, optional_i64, optional_str, parse_csv_record, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Default)]
struct NewStudent {
    roll_number: String,
    name: String,
    department: Option<String>,
    semester: Option<i64>,
    section: Option<String>,
    email: Option<String>,
}

const STUDENT_COLUMNS: &str = "id, roll_number, name, department, semester, section, email";

fn student_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "rollNumber": row.get::<_, String>(1)?,
        "name": row.get::<_, String>(2)?,
        "department": row.get::<_, Option<String>>(3)?,
        "semester": row.get::<_, Option<i64>>(4)?,
        "section": row.get::<_, Option<String>>(5)?,
        "email": row.get::<_, Option<String>>(6)?,
    }))
}

fn insert_student(conn: &Connection, s: &NewStudent) -> Result<i64, HandlerErr> {
    conn.execute(
        "INSERT INTO students(roll_number, name, department, semester, section, email, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &s.roll_number,
            &s.name,
            &s.department,
            s.semester,
            &s.section,
            &s.email,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| {
        classify_write_err("db_insert_failed", e)
            .with_details(json!({ "table": "students", "rollNumber": s.roll_number }))
    })?;
    Ok(conn.last_insert_rowid())
}

fn list_students(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "students": [] }));
    };
    let department = optional_str(&req.params, "department")?;
    let semester = optional_i64(&req.params, "semester")?;

    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        clauses.push("department = ?");
        binds.push(Value::Text(d));
    }
    if let Some(s) = semester {
        clauses.push("semester = ?");
        binds.push(Value::Integer(s));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY roll_number");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map(params_from_iter(binds), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn create_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let s = NewStudent {
        roll_number: required_str(req, "rollNumber")?,
        name: required_str(req, "name")?,
        department: optional_str(&req.params, "department")?,
        semester: optional_i64(&req.params, "semester")?,
        section: optional_str(&req.params, "section")?,
        email: optional_str(&req.params, "email")?,
    };
    let id = insert_student(conn, &s)?;
    Ok(json!({ "studentId": id }))
}

fn update_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_i64(req, "studentId")?;
    let patch = req
        .params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "patch must be an object"))?;

    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    for (key, column) in [("rollNumber", "roll_number"), ("name", "name")] {
        if patch.get(key).is_some() {
            let v = optional_str(patch, key)?
                .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must not be empty", key)))?;
            sets.push(format!("{} = ?", column));
            binds.push(Value::Text(v));
        }
    }
    for (key, column) in [
        ("department", "department"),
        ("section", "section"),
        ("email", "email"),
    ] {
        if patch.get(key).is_some() {
            sets.push(format!("{} = ?", column));
            binds.push(optional_str(patch, key)?.map_or(Value::Null, Value::Text));
        }
    }
    if patch.get("semester").is_some() {
        sets.push("semester = ?".into());
        binds.push(optional_i64(patch, "semester")?.map_or(Value::Null, Value::Integer));
    }
    if sets.is_empty() {
        return Err(HandlerErr::new("bad_params", "patch has no known fields"));
    }

    binds.push(Value::Integer(student_id));
    let changed = conn
        .execute(
            &format!("UPDATE students SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(binds),
        )
        .map_err(|e| classify_write_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn delete_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_i64(req, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let released = tx
        .execute(
            "DELETE FROM seat_allocations WHERE student_id = ?",
            [student_id],
        )
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "seat_allocations" }))
        })?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "students" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "releasedSeats": released }))
}

/// Header name -> field, accepting the spellings spreadsheet exports tend to use.
fn header_field(h: &str) -> Option<&'static str> {
    let norm: String = h
        .trim()
        .chars()
        .filter(|c| *c != '_' && *c != ' ')
        .collect::<String>()
        .to_ascii_lowercase();
    match norm.as_str() {
        "rollnumber" | "rollno" | "roll" => Some("roll_number"),
        "name" => Some("name"),
        "department" | "dept" => Some("department"),
        "semester" | "sem" => Some("semester"),
        "section" => Some("section"),
        "email" => Some("email"),
        _ => None,
    }
}

struct ParsedRoster {
    rows: Vec<(usize, NewStudent)>,
    warnings: Vec<serde_json::Value>,
}

fn parse_student_csv(text: &str) -> Result<ParsedRoster, HandlerErr> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Err(HandlerErr::new("bad_params", "csv is empty"));
    };
    let columns: Vec<Option<&'static str>> =
        parse_csv_record(header).iter().map(|h| header_field(h)).collect();
    for required in ["roll_number", "name"] {
        if !columns.contains(&Some(required)) {
            return Err(HandlerErr::new(
                "bad_params",
                format!("csv header missing {} column", required),
            ));
        }
    }

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let mut s = NewStudent::default();
        let mut bad_semester = false;
        for (field, raw) in columns.iter().zip(parse_csv_record(line)) {
            let v = raw.trim().to_string();
            let opt = if v.is_empty() { None } else { Some(v.clone()) };
            match *field {
                Some("roll_number") => s.roll_number = v,
                Some("name") => s.name = v,
                Some("department") => s.department = opt,
                Some("semester") => match opt.map(|x| x.parse::<i64>()) {
                    Some(Ok(n)) => s.semester = Some(n),
                    Some(Err(_)) => bad_semester = true,
                    None => {}
                },
                Some("section") => s.section = opt,
                Some("email") => s.email = opt,
                _ => {}
            }
        }
        if bad_semester {
            warnings.push(json!({
                "line": line_no,
                "code": "bad_semester",
                "message": "semester must be an integer"
            }));
            continue;
        }
        if s.roll_number.is_empty() || s.name.is_empty() {
            warnings.push(json!({
                "line": line_no,
                "code": "missing_fields",
                "message": "roll_number and name are required"
            }));
            continue;
        }
        rows.push((line_no, s));
    }
    Ok(ParsedRoster { rows, warnings })
}

fn import_students_csv(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let text = match (
        optional_str(&req.params, "text")?,
        optional_str(&req.params, "path")?,
    ) {
        (Some(t), _) => t,
        (None, Some(p)) => std::fs::read_to_string(&p).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": p }))
        })?,
        (None, None) => return Err(HandlerErr::new("bad_params", "missing text or path")),
    };

    let ParsedRoster { rows, mut warnings } = parse_student_csv(&text)?;
    let mut failed = warnings.len();
    let mut imported = 0usize;
    // Rows are independent: one bad row never rolls back the rest.
    for (line_no, s) in rows {
        match insert_student(conn, &s) {
            Ok(_) => imported += 1,
            Err(e) => {
                failed += 1;
                warnings.push(json!({
                    "line": line_no,
                    "code": e.code,
                    "message": e.message
                }));
            }
        }
    }
    info!(imported, failed, "student csv import finished");

    Ok(json!({ "imported": imported, "failed": failed, "warnings": warnings }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list_students(state, req),
        "students.create" => create_student(state, req),
        "students.update" => update_student(state, req),
        "students.delete" => delete_student(state, req),
        "students.importCsv" => import_students_csv(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
