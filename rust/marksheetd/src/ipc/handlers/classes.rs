use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.section,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM marksheets m WHERE m.class_id = c.id) AS marksheet_count,
           (SELECT COUNT(*) FROM marksheets m
              WHERE m.class_id = c.id AND m.status = 'draft') AS draft_count
         FROM classes c
         ORDER BY c.name, c.section",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let section: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let marksheet_count: i64 = row.get(4)?;
            let draft_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "section": section,
                "studentCount": student_count,
                "marksheetCount": marksheet_count,
                "draftCount": draft_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_class(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let section = get_opt_str(&req.params, "section");

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM classes WHERE name = ? AND IFNULL(section, '') = IFNULL(?, '')",
            (&name, &section),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = duplicate {
        return Err(HandlerErr {
            code: "duplicate",
            message: format!("class {} already exists", name),
            details: Some(json!({ "existingId": existing })),
        });
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, section) VALUES(?, ?, ?)",
        (&class_id, &name, &section),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    tracing::info!(class_id = %class_id, name = %name, "class created");

    Ok(json!({ "classId": class_id, "name": name, "section": section }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(match create_class(state, req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
