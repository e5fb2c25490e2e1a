use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_id_list, get_opt_str, get_required_str, parse_field, parse_params, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Marksheet, MarksheetDraft, MarksheetPatch};
use crate::status::{self, MarksheetStatus, Transition};
use crate::store::{self, BulkOp, MarksheetFilter};
use serde_json::json;

const BULK_MAX_IDS: usize = 500;

fn marksheet_json(m: &Marksheet) -> Result<serde_json::Value, HandlerErr> {
    let mut v = serde_json::to_value(m).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })?;
    v["permissions"] = json!(m.permissions());
    Ok(v)
}

fn parse_status(raw: &str) -> Result<MarksheetStatus, HandlerErr> {
    MarksheetStatus::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "status must be one of: draft, published, finalized".to_string(),
        details: Some(json!({ "status": raw })),
    })
}

fn filter_from_params(params: &serde_json::Value) -> Result<MarksheetFilter, HandlerErr> {
    let status = match get_opt_str(params, "status") {
        Some(s) => Some(parse_status(&s)?),
        None => None,
    };
    Ok(MarksheetFilter {
        class_id: get_opt_str(params, "classId"),
        student_id: get_opt_str(params, "studentId"),
        status,
        academic_year: get_opt_str(params, "academicYear"),
        term: get_opt_str(params, "term"),
        exam_type: get_opt_str(params, "examType"),
        published_only: false,
    })
}

fn sheets_json(sheets: &[Marksheet]) -> Result<Vec<serde_json::Value>, HandlerErr> {
    sheets.iter().map(marksheet_json).collect()
}

fn marksheets_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "marksheets": [] }));
    };
    let filter = filter_from_params(&req.params)?;
    let sheets = store::list_marksheets(conn, &filter)?;
    Ok(json!({ "marksheets": sheets_json(&sheets)? }))
}

fn marksheets_list_for_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let filter = MarksheetFilter {
        student_id: Some(get_required_str(&req.params, "studentId")?),
        academic_year: get_opt_str(&req.params, "academicYear"),
        published_only: true,
        ..Default::default()
    };
    let sheets = store::list_marksheets(conn, &filter)?;
    Ok(json!({ "marksheets": sheets_json(&sheets)? }))
}

fn marksheets_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "marksheetId")?;
    let m = store::get_marksheet(conn, &id)?;
    Ok(json!({ "marksheet": marksheet_json(&m)? }))
}

fn marksheets_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let draft: MarksheetDraft = parse_params(&req.params)?;
    let m = store::create_marksheet(conn, draft)?;
    Ok(json!({ "marksheetId": m.id, "marksheet": marksheet_json(&m)? }))
}

fn marksheets_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "marksheetId")?;
    let patch: MarksheetPatch = parse_field(&req.params, "patch")?;
    let m = store::update_marksheet(conn, &id, patch)?;
    Ok(json!({ "marksheet": marksheet_json(&m)? }))
}

fn marksheets_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "marksheetId")?;
    store::delete_marksheet(conn, &id)?;
    Ok(json!({ "marksheetId": id, "deleted": true }))
}

fn marksheets_transition(
    state: &mut AppState,
    req: &Request,
    to: Transition,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "marksheetId")?;
    let m = store::transition(conn, &id, to).inspect_err(|e| {
        tracing::warn!(marksheet_id = %id, action = to.as_str(), error = %e, "transition rejected");
    })?;
    Ok(json!({ "marksheet": marksheet_json(&m)? }))
}

fn marksheets_bulk(
    state: &mut AppState,
    req: &Request,
    op: BulkOp,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let ids = get_id_list(&req.params, "marksheetIds", BULK_MAX_IDS)?;
    let outcome = store::bulk_apply(conn, &ids, op);
    let errors: Vec<serde_json::Value> = outcome
        .failed
        .iter()
        .map(|(id, e)| {
            json!({
                "marksheetId": id,
                "code": e.code(),
                "message": e.to_string(),
                "details": e.details()
            })
        })
        .collect();
    Ok(json!({
        "applied": outcome.applied.len(),
        "rejected": outcome.failed.len(),
        "appliedIds": outcome.applied,
        "errors": errors
    }))
}

fn marksheets_permissions(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let status = if let Some(raw) = get_opt_str(&req.params, "status") {
        parse_status(&raw)?
    } else if let Some(id) = get_opt_str(&req.params, "marksheetId") {
        let conn = require_db(state)?;
        store::get_marksheet(conn, &id)?.status
    } else {
        return Err(HandlerErr::bad_params("missing status or marksheetId"));
    };
    Ok(json!({
        "status": status,
        "permissions": status::permissions(status)
    }))
}

fn marksheets_class_summary(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let filter = filter_from_params(&req.params)?;
    let summary = store::class_summary(conn, &class_id, &filter)?;
    Ok(json!({ "summary": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "marksheets.list" => marksheets_list(state, req),
        "marksheets.listForStudent" => marksheets_list_for_student(state, req),
        "marksheets.get" => marksheets_get(state, req),
        "marksheets.create" => marksheets_create(state, req),
        "marksheets.update" => marksheets_update(state, req),
        "marksheets.delete" => marksheets_delete(state, req),
        "marksheets.publish" => marksheets_transition(state, req, Transition::Publish),
        "marksheets.finalize" => marksheets_transition(state, req, Transition::Finalize),
        "marksheets.bulkPublish" => marksheets_bulk(state, req, BulkOp::Publish),
        "marksheets.bulkFinalize" => marksheets_bulk(state, req, BulkOp::Finalize),
        "marksheets.bulkDelete" => marksheets_bulk(state, req, BulkOp::Delete),
        "marksheets.permissions" => marksheets_permissions(state, req),
        "marksheets.classSummary" => marksheets_class_summary(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
