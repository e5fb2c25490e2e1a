use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn ensure_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: Some(json!({ "classId": class_id })),
        });
    }
    Ok(())
}

fn students_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    ensure_class(conn, &class_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, name, roll_no
         FROM students
         WHERE class_id = ?
         ORDER BY roll_no IS NULL, roll_no, name",
    )?;
    let students = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let roll_no: Option<String> = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "rollNo": roll_no }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ "classId": class_id, "students": students }))
}

fn students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let name = get_required_str(&req.params, "name")?;
    let roll_no = get_opt_str(&req.params, "rollNo");
    ensure_class(conn, &class_id)?;

    if let Some(roll) = roll_no.as_deref() {
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM students WHERE class_id = ? AND roll_no = ?",
                (&class_id, roll),
                |r| r.get(0),
            )
            .optional()?;
        if let Some(existing) = taken {
            return Err(HandlerErr {
                code: "duplicate",
                message: format!("roll number {} is already used in this class", roll),
                details: Some(json!({ "existingId": existing })),
            });
        }
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, name, roll_no) VALUES(?, ?, ?, ?)",
        (&student_id, &class_id, &name, &roll_no),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({
        "studentId": student_id,
        "classId": class_id,
        "name": name,
        "rollNo": roll_no
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => students_create(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
