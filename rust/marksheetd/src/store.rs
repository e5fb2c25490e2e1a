use crate::calc::{Grade, GradingError, OverallResult};
use crate::model::{Conduct, Marksheet, MarksheetDraft, MarksheetError, MarksheetPatch};
use crate::status::{Action, MarksheetStatus, StatusError, Transition};
use anyhow::anyhow;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("a marksheet already exists for this student, academic year, term and exam type")]
    Duplicate { existing_id: String },
    #[error(transparent)]
    Grading(#[from] GradingError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Db(e.into())
    }
}

impl From<MarksheetError> for StoreError {
    fn from(e: MarksheetError) -> Self {
        match e {
            MarksheetError::Grading(g) => StoreError::Grading(g),
            MarksheetError::Status(s) => StoreError::Status(s),
        }
    }
}

impl StoreError {
    /// Stable wire code for the IPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Duplicate { .. } => "duplicate",
            StoreError::Grading(_) => "invalid_input",
            StoreError::Status(_) => "illegal_transition",
            StoreError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::NotFound { entity, id } => {
                Some(serde_json::json!({ "entity": entity, "id": id }))
            }
            StoreError::Duplicate { existing_id } => {
                Some(serde_json::json!({ "existingId": existing_id }))
            }
            StoreError::Grading(GradingError::InvalidInput { field, .. }) => {
                Some(serde_json::json!({ "field": field }))
            }
            StoreError::Status(StatusError::IllegalTransition { from, action }) => {
                Some(serde_json::json!({ "status": from, "action": action }))
            }
            StoreError::Db(_) => None,
        }
    }
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

const SELECT_MARKSHEET: &str = "SELECT
    id, student_id, class_id, academic_year, term, exam_type,
    subjects_json, conduct_json, class_teacher_remarks, principal_remarks,
    overall_percentage, overall_grade, cgpa, rank, total_students,
    status, created_at, updated_at, published_at, finalized_at
  FROM marksheets";

struct StoredRow {
    id: String,
    student_id: String,
    class_id: String,
    academic_year: String,
    term: String,
    exam_type: String,
    subjects_json: String,
    conduct_json: String,
    class_teacher_remarks: String,
    principal_remarks: String,
    overall_percentage: f64,
    overall_grade: String,
    cgpa: f64,
    rank: Option<u32>,
    total_students: Option<u32>,
    status: String,
    created_at: String,
    updated_at: String,
    published_at: Option<String>,
    finalized_at: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
        Ok(StoredRow {
            id: row.get(0)?,
            student_id: row.get(1)?,
            class_id: row.get(2)?,
            academic_year: row.get(3)?,
            term: row.get(4)?,
            exam_type: row.get(5)?,
            subjects_json: row.get(6)?,
            conduct_json: row.get(7)?,
            class_teacher_remarks: row.get(8)?,
            principal_remarks: row.get(9)?,
            overall_percentage: row.get(10)?,
            overall_grade: row.get(11)?,
            cgpa: row.get(12)?,
            rank: row.get(13)?,
            total_students: row.get(14)?,
            status: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
            published_at: row.get(18)?,
            finalized_at: row.get(19)?,
        })
    }

    fn into_marksheet(self) -> Result<Marksheet, StoreError> {
        let status = MarksheetStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("marksheet {} has unknown status {:?}", self.id, self.status))?;
        let grade = Grade::parse(&self.overall_grade).ok_or_else(|| {
            anyhow!(
                "marksheet {} has unknown grade {:?}",
                self.id,
                self.overall_grade
            )
        })?;
        let conduct: Conduct = serde_json::from_str(&self.conduct_json)?;
        Ok(Marksheet {
            subjects: serde_json::from_str(&self.subjects_json)?,
            conduct,
            overall: OverallResult {
                percentage: self.overall_percentage,
                grade,
                cgpa: self.cgpa,
                rank: self.rank,
                total_students: self.total_students,
            },
            status,
            id: self.id,
            student_id: self.student_id,
            class_id: self.class_id,
            academic_year: self.academic_year,
            term: self.term,
            exam_type: self.exam_type,
            class_teacher_remarks: self.class_teacher_remarks,
            principal_remarks: self.principal_remarks,
            created_at: self.created_at,
            updated_at: self.updated_at,
            published_at: self.published_at,
            finalized_at: self.finalized_at,
        })
    }
}

pub fn get_marksheet(conn: &Connection, marksheet_id: &str) -> Result<Marksheet, StoreError> {
    let sql = format!("{SELECT_MARKSHEET} WHERE id = ?");
    let row = conn
        .query_row(&sql, [marksheet_id], StoredRow::from_row)
        .optional()?;
    match row {
        Some(r) => r.into_marksheet(),
        None => Err(StoreError::NotFound {
            entity: "marksheet",
            id: marksheet_id.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarksheetFilter {
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub status: Option<MarksheetStatus>,
    pub academic_year: Option<String>,
    pub term: Option<String>,
    pub exam_type: Option<String>,
    /// Drop drafts; used for the student-facing listing.
    pub published_only: bool,
}

pub fn list_marksheets(
    conn: &Connection,
    filter: &MarksheetFilter,
) -> Result<Vec<Marksheet>, StoreError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    let text_filters = [
        ("class_id = ?", &filter.class_id),
        ("student_id = ?", &filter.student_id),
        ("academic_year = ?", &filter.academic_year),
        ("term = ?", &filter.term),
        ("exam_type = ?", &filter.exam_type),
    ];
    for (clause, value) in text_filters {
        if let Some(v) = value {
            clauses.push(clause);
            bind.push(Value::Text(v.clone()));
        }
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        bind.push(Value::Text(status.as_str().to_string()));
    }
    if filter.published_only {
        clauses.push("status <> 'draft'");
    }

    let mut sql = SELECT_MARKSHEET.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY academic_year DESC, term, exam_type, created_at");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), StoredRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(StoredRow::into_marksheet).collect()
}

fn find_duplicate(conn: &Connection, m: &Marksheet) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM marksheets
             WHERE student_id = ? AND academic_year = ? AND term = ? AND exam_type = ? AND id <> ?",
            params![m.student_id, m.academic_year, m.term, m.exam_type, m.id],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn create_marksheet(conn: &Connection, draft: MarksheetDraft) -> Result<Marksheet, StoreError> {
    let student_id = draft.student_id.trim().to_string();
    if student_id.is_empty() {
        return Err(GradingError::InvalidInput {
            field: "studentId".to_string(),
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Err(StoreError::NotFound {
            entity: "student",
            id: student_id,
        });
    };

    let m = Marksheet::new(
        Uuid::new_v4().to_string(),
        class_id,
        draft,
        now_timestamp(),
    )?;
    if let Some(existing_id) = find_duplicate(conn, &m)? {
        return Err(StoreError::Duplicate { existing_id });
    }

    conn.execute(
        "INSERT INTO marksheets(
            id, student_id, class_id, academic_year, term, exam_type,
            subjects_json, conduct_json, class_teacher_remarks, principal_remarks,
            overall_percentage, overall_grade, cgpa, rank, total_students,
            status, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            m.id,
            m.student_id,
            m.class_id,
            m.academic_year,
            m.term,
            m.exam_type,
            serde_json::to_string(&m.subjects)?,
            serde_json::to_string(&m.conduct)?,
            m.class_teacher_remarks,
            m.principal_remarks,
            m.overall.percentage,
            m.overall.grade.as_str(),
            m.overall.cgpa,
            m.overall.rank,
            m.overall.total_students,
            m.status.as_str(),
            m.created_at,
            m.updated_at,
        ],
    )?;
    tracing::info!(marksheet_id = %m.id, student_id = %m.student_id, "marksheet created");
    Ok(m)
}

/// The row changed under us between read and write: report what it is now.
fn stale_row_error(conn: &Connection, marksheet_id: &str, action: Action) -> StoreError {
    match get_marksheet(conn, marksheet_id) {
        Ok(current) => StoreError::Status(StatusError::IllegalTransition {
            from: current.status,
            action,
        }),
        Err(e) => e,
    }
}

pub fn update_marksheet(
    conn: &Connection,
    marksheet_id: &str,
    patch: MarksheetPatch,
) -> Result<Marksheet, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let mut m = get_marksheet(&tx, marksheet_id)?;
    m.apply_patch(patch, now_timestamp())?;
    if let Some(existing_id) = find_duplicate(&tx, &m)? {
        return Err(StoreError::Duplicate { existing_id });
    }

    // The status guard in the WHERE clause is the authoritative edit check.
    let changed = tx.execute(
        "UPDATE marksheets SET
            academic_year = ?, term = ?, exam_type = ?,
            subjects_json = ?, conduct_json = ?,
            class_teacher_remarks = ?, principal_remarks = ?,
            overall_percentage = ?, overall_grade = ?, cgpa = ?,
            rank = ?, total_students = ?, updated_at = ?
         WHERE id = ? AND status = 'draft'",
        params![
            m.academic_year,
            m.term,
            m.exam_type,
            serde_json::to_string(&m.subjects)?,
            serde_json::to_string(&m.conduct)?,
            m.class_teacher_remarks,
            m.principal_remarks,
            m.overall.percentage,
            m.overall.grade.as_str(),
            m.overall.cgpa,
            m.overall.rank,
            m.overall.total_students,
            m.updated_at,
            m.id,
        ],
    )?;
    if changed == 0 {
        return Err(stale_row_error(&tx, marksheet_id, Action::Edit));
    }
    tx.commit()?;
    tracing::debug!(marksheet_id, "marksheet updated");
    Ok(m)
}

pub fn delete_marksheet(conn: &Connection, marksheet_id: &str) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    let m = get_marksheet(&tx, marksheet_id)?;
    m.ensure_allowed(Action::Delete)?;
    let changed = tx.execute(
        "DELETE FROM marksheets WHERE id = ? AND status = 'draft'",
        [marksheet_id],
    )?;
    if changed == 0 {
        return Err(stale_row_error(&tx, marksheet_id, Action::Delete));
    }
    tx.commit()?;
    tracing::info!(marksheet_id, "marksheet deleted");
    Ok(())
}

/// Runs a publish or finalize transition against the stored status.
pub fn transition(
    conn: &Connection,
    marksheet_id: &str,
    to: Transition,
) -> Result<Marksheet, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let mut m = get_marksheet(&tx, marksheet_id)?;
    let from = m.status;
    let now = now_timestamp();
    match to {
        Transition::Publish => m.publish(now)?,
        Transition::Finalize => m.finalize(now)?,
    }

    let changed = tx.execute(
        "UPDATE marksheets SET status = ?, published_at = ?, finalized_at = ?, updated_at = ?
         WHERE id = ? AND status = ?",
        params![
            m.status.as_str(),
            m.published_at,
            m.finalized_at,
            m.updated_at,
            m.id,
            from.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(stale_row_error(&tx, marksheet_id, to.action()));
    }
    tx.commit()?;
    tracing::info!(marksheet_id, from = %from, to = %m.status, "marksheet status changed");
    Ok(m)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOp {
    Publish,
    Finalize,
    Delete,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

/// Each id is handled on its own; a failure never undoes ids already applied.
pub fn bulk_apply(conn: &Connection, marksheet_ids: &[String], op: BulkOp) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in marksheet_ids {
        let res = match op {
            BulkOp::Publish => transition(conn, id, Transition::Publish).map(|_| ()),
            BulkOp::Finalize => transition(conn, id, Transition::Finalize).map(|_| ()),
            BulkOp::Delete => delete_marksheet(conn, id),
        };
        match res {
            Ok(()) => outcome.applied.push(id.clone()),
            Err(e) => {
                tracing::warn!(marksheet_id = %id, op = ?op, error = %e, "bulk item rejected");
                outcome.failed.push((id.clone(), e));
            }
        }
    }
    outcome
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub class_id: String,
    pub total: usize,
    pub draft: usize,
    pub published: usize,
    pub finalized: usize,
    /// Averages cover published and finalized sheets only.
    pub average_percentage: Option<f64>,
    pub average_cgpa: Option<f64>,
    pub grade_distribution: BTreeMap<String, usize>,
}

/// `filter` narrows by year, term and exam type; its class and status
/// fields are ignored.
pub fn class_summary(
    conn: &Connection,
    class_id: &str,
    filter: &MarksheetFilter,
) -> Result<ClassSummary, StoreError> {
    let class_id = class_id.to_string();
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::NotFound {
            entity: "class",
            id: class_id,
        });
    }

    let scoped = MarksheetFilter {
        class_id: Some(class_id.clone()),
        status: None,
        published_only: false,
        ..filter.clone()
    };
    let sheets = list_marksheets(conn, &scoped)?;
    let mut summary = ClassSummary {
        class_id,
        total: sheets.len(),
        draft: 0,
        published: 0,
        finalized: 0,
        average_percentage: None,
        average_cgpa: None,
        grade_distribution: BTreeMap::new(),
    };

    let mut pct_sum = 0.0;
    let mut cgpa_sum = 0.0;
    let mut counted = 0usize;
    for m in &sheets {
        match m.status {
            MarksheetStatus::Draft => summary.draft += 1,
            MarksheetStatus::Published => summary.published += 1,
            MarksheetStatus::Finalized => summary.finalized += 1,
        }
        if !m.status.visible_to_student() {
            continue;
        }
        counted += 1;
        pct_sum += m.overall.percentage;
        cgpa_sum += m.overall.cgpa;
        *summary
            .grade_distribution
            .entry(m.overall.grade.as_str().to_string())
            .or_insert(0) += 1;
    }
    if counted > 0 {
        summary.average_percentage = Some(crate::calc::round_2_decimals(pct_sum / counted as f64));
        summary.average_cgpa = Some(crate::calc::round_2_decimals(cgpa_sum / counted as f64));
    }
    Ok(summary)
}
