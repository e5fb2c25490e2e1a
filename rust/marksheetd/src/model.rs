use crate::calc::{self, GradingError, OverallResult, SubjectMark};
use crate::status::{self, Action, MarksheetStatus, Permissions, StatusError};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conduct {
    #[serde(default)]
    pub discipline: String,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marksheet {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub academic_year: String,
    pub term: String,
    pub exam_type: String,
    pub subjects: Vec<SubjectMark>,
    pub conduct: Conduct,
    pub class_teacher_remarks: String,
    pub principal_remarks: String,
    pub overall: OverallResult,
    pub status: MarksheetStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<String>,
}

/// Caller input for a new marksheet. Derived fields are never read from it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksheetDraft {
    pub student_id: String,
    pub academic_year: String,
    pub term: String,
    pub exam_type: String,
    #[serde(default)]
    pub subjects: Vec<SubjectMark>,
    #[serde(default)]
    pub conduct: Conduct,
    #[serde(default)]
    pub class_teacher_remarks: String,
    #[serde(default)]
    pub principal_remarks: String,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub total_students: Option<u32>,
}

/// Maps a present field to `Some`, so `null` reads as `Some(None)` and
/// an absent field stays `None` through `#[serde(default)]`.
fn present<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

/// Partial update; absent fields keep their stored value. Status and the
/// derived `overall` fields are not patchable, so unknown keys are refused.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarksheetPatch {
    pub academic_year: Option<String>,
    pub term: Option<String>,
    pub exam_type: Option<String>,
    pub subjects: Option<Vec<SubjectMark>>,
    pub conduct: Option<Conduct>,
    pub class_teacher_remarks: Option<String>,
    pub principal_remarks: Option<String>,
    /// `null` clears the stored rank.
    #[serde(default, deserialize_with = "present")]
    pub rank: Option<Option<u32>>,
    #[serde(default, deserialize_with = "present")]
    pub total_students: Option<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarksheetError {
    #[error(transparent)]
    Grading(#[from] GradingError),
    #[error(transparent)]
    Status(#[from] StatusError),
}

fn require_text(field: &str, value: &str) -> Result<String, GradingError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(GradingError::InvalidInput {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(v.to_string())
}

fn check_rank(rank: Option<u32>, total_students: Option<u32>) -> Result<(), GradingError> {
    if rank == Some(0) {
        return Err(GradingError::InvalidInput {
            field: "rank".to_string(),
            reason: "rank starts at 1".to_string(),
        });
    }
    if let (Some(r), Some(t)) = (rank, total_students) {
        if r > t {
            return Err(GradingError::InvalidInput {
                field: "rank".to_string(),
                reason: format!("rank {r} is outside 1..={t}"),
            });
        }
    }
    Ok(())
}

impl Marksheet {
    pub fn new(
        id: String,
        class_id: String,
        draft: MarksheetDraft,
        now: String,
    ) -> Result<Marksheet, GradingError> {
        let mut m = Marksheet {
            id,
            student_id: require_text("studentId", &draft.student_id)?,
            class_id,
            academic_year: require_text("academicYear", &draft.academic_year)?,
            term: require_text("term", &draft.term)?,
            exam_type: require_text("examType", &draft.exam_type)?,
            subjects: draft.subjects,
            conduct: draft.conduct,
            class_teacher_remarks: draft.class_teacher_remarks,
            principal_remarks: draft.principal_remarks,
            overall: OverallResult {
                rank: draft.rank,
                total_students: draft.total_students,
                ..OverallResult::default()
            },
            status: MarksheetStatus::Draft,
            created_at: now.clone(),
            updated_at: now,
            published_at: None,
            finalized_at: None,
        };
        m.recompute()?;
        Ok(m)
    }

    /// Validates the subjects and rebuilds every derived field. Rank and
    /// class size are external and carried over unchanged.
    pub fn recompute(&mut self) -> Result<(), GradingError> {
        check_rank(self.overall.rank, self.overall.total_students)?;
        calc::validate_subjects(&self.subjects)?;
        self.subjects = self
            .subjects
            .iter()
            .map(calc::with_derived_attendance)
            .collect::<Result<Vec<_>, _>>()?;
        let computed = calc::overall_result(&self.subjects)?;
        self.overall = OverallResult {
            rank: self.overall.rank,
            total_students: self.overall.total_students,
            ..computed
        };
        Ok(())
    }

    pub fn permissions(&self) -> Permissions {
        status::permissions(self.status)
    }

    pub fn ensure_allowed(&self, action: Action) -> Result<(), StatusError> {
        status::check(self.status, action)
    }

    /// Applies the patch to a copy so a rejected patch leaves `self` as it was.
    pub fn apply_patch(&mut self, patch: MarksheetPatch, now: String) -> Result<(), MarksheetError> {
        self.ensure_allowed(Action::Edit)?;
        let mut next = self.clone();
        if let Some(v) = patch.academic_year {
            next.academic_year = require_text("academicYear", &v)?;
        }
        if let Some(v) = patch.term {
            next.term = require_text("term", &v)?;
        }
        if let Some(v) = patch.exam_type {
            next.exam_type = require_text("examType", &v)?;
        }
        if let Some(v) = patch.subjects {
            next.subjects = v;
        }
        if let Some(v) = patch.conduct {
            next.conduct = v;
        }
        if let Some(v) = patch.class_teacher_remarks {
            next.class_teacher_remarks = v;
        }
        if let Some(v) = patch.principal_remarks {
            next.principal_remarks = v;
        }
        if let Some(v) = patch.rank {
            next.overall.rank = v;
        }
        if let Some(v) = patch.total_students {
            next.overall.total_students = v;
        }
        next.recompute()?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn publish(&mut self, now: String) -> Result<(), StatusError> {
        self.status = status::publish(self.status)?;
        self.published_at = Some(now.clone());
        self.updated_at = now;
        Ok(())
    }

    pub fn finalize(&mut self, now: String) -> Result<(), StatusError> {
        self.status = status::finalize(self.status)?;
        self.finalized_at = Some(now.clone());
        self.updated_at = now;
        Ok(())
    }
}
