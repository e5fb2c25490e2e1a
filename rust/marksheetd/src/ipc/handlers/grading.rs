use crate::calc::{self, Grade, SubjectMark, GRADE_THRESHOLDS};
use crate::ipc::error::ok;
use crate::ipc::helpers::{parse_field, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn invalid_input(e: calc::GradingError) -> HandlerErr {
    let calc::GradingError::InvalidInput { field, .. } = &e;
    HandlerErr {
        code: "invalid_input",
        details: Some(json!({ "field": field })),
        message: e.to_string(),
    }
}

/// Derived fields for an unsaved draft. Range problems are reported next to
/// the results instead of failing the call, so a half-typed form still
/// renders.
fn grading_preview(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let subjects: Vec<SubjectMark> = parse_field(&req.params, "subjects")?;
    let overall = calc::overall_result(&subjects).map_err(invalid_input)?;

    let mut rows = Vec::with_capacity(subjects.len());
    let mut issues = Vec::new();
    for (idx, subject) in subjects.iter().enumerate() {
        let result = calc::subject_result(subject).map_err(invalid_input)?;
        let attendance = calc::attendance_percentage(
            subject.attendance.present,
            subject.attendance.total,
        )
        .map_err(invalid_input)?;
        if let Err(calc::GradingError::InvalidInput { field, reason }) =
            calc::validate_subject(&format!("subjects[{idx}]."), subject)
        {
            issues.push(json!({ "field": field, "message": reason }));
        }
        rows.push(json!({
            "subjectId": subject.subject_id,
            "obtainedMarks": result.obtained_marks,
            "totalMarks": result.total_marks,
            "percentage": result.percentage,
            "grade": result.grade,
            "gradePoints": result.grade.points(),
            "attendancePercentage": attendance
        }));
    }

    Ok(json!({
        "subjects": rows,
        "overall": overall,
        "issues": issues
    }))
}

fn grading_scale() -> serde_json::Value {
    let mut bands: Vec<serde_json::Value> = GRADE_THRESHOLDS
        .iter()
        .map(|(min, grade)| {
            json!({ "grade": grade, "minPercentage": min, "points": grade.points() })
        })
        .collect();
    bands.push(json!({ "grade": Grade::F, "minPercentage": 0.0, "points": Grade::F.points() }));
    json!({ "bands": bands })
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.preview" => Some(match grading_preview(req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "grading.scale" => Some(ok(&req.id, grading_scale())),
        _ => None,
    }
}
