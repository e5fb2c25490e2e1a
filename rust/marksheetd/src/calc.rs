use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradingError {
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },
}

impl GradingError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GradingError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "F")]
    F,
}

/// Lower percentage bound (inclusive) for each passing grade, best first.
/// Anything below the last bound is an F.
pub const GRADE_THRESHOLDS: [(f64, Grade); 7] = [
    (90.0, Grade::APlus),
    (80.0, Grade::A),
    (70.0, Grade::BPlus),
    (60.0, Grade::B),
    (50.0, Grade::CPlus),
    (40.0, Grade::C),
    (33.0, Grade::D),
];

impl Grade {
    pub const ALL: [Grade; 8] = [
        Grade::APlus,
        Grade::A,
        Grade::BPlus,
        Grade::B,
        Grade::CPlus,
        Grade::C,
        Grade::D,
        Grade::F,
    ];

    pub fn from_percentage(percentage: f64) -> Grade {
        GRADE_THRESHOLDS
            .iter()
            .find(|(min, _)| percentage >= *min)
            .map(|(_, g)| *g)
            .unwrap_or(Grade::F)
    }

    pub fn points(self) -> f64 {
        match self {
            Grade::APlus => 10.0,
            Grade::A => 9.0,
            Grade::BPlus => 8.0,
            Grade::B => 7.0,
            Grade::CPlus => 6.0,
            Grade::C => 5.0,
            Grade::D => 4.0,
            Grade::F => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Grade> {
        Grade::ALL.into_iter().find(|g| g.as_str() == s)
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-decimal rounding used for every derived percentage and the CGPA.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPair {
    pub marks_obtained: f64,
    pub total_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub present: f64,
    pub total: f64,
    /// Derived; whatever the caller sends is overwritten on save.
    #[serde(default)]
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub subject_id: String,
    pub subject_name: String,
    pub theory: MarkPair,
    #[serde(default)]
    pub practical: MarkPair,
    #[serde(default)]
    pub attendance: Attendance,
    #[serde(default)]
    pub remarks: String,
}

impl SubjectMark {
    fn total_marks(&self) -> f64 {
        self.theory.total_marks + self.practical.total_marks
    }

    fn obtained_marks(&self) -> f64 {
        self.theory.marks_obtained + self.practical.marks_obtained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub obtained_marks: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallResult {
    pub percentage: f64,
    pub grade: Grade,
    pub cgpa: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_students: Option<u32>,
}

impl Default for OverallResult {
    fn default() -> Self {
        OverallResult {
            percentage: 0.0,
            grade: Grade::F,
            cgpa: 0.0,
            rank: None,
            total_students: None,
        }
    }
}

fn require_finite(field: &str, v: f64) -> Result<f64, GradingError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(GradingError::invalid(field, format!("{v} is not a finite number")))
    }
}

fn check_marks_finite(prefix: &str, subject: &SubjectMark) -> Result<(), GradingError> {
    require_finite(
        &format!("{prefix}theory.marksObtained"),
        subject.theory.marks_obtained,
    )?;
    require_finite(&format!("{prefix}theory.totalMarks"), subject.theory.total_marks)?;
    require_finite(
        &format!("{prefix}practical.marksObtained"),
        subject.practical.marks_obtained,
    )?;
    require_finite(
        &format!("{prefix}practical.totalMarks"),
        subject.practical.total_marks,
    )?;
    Ok(())
}

/// Sums of finite marks can still overflow, so the pooled values and the
/// quotient are checked again here.
fn percentage_of(field: &str, obtained: f64, total: f64) -> Result<f64, GradingError> {
    if !obtained.is_finite() || !total.is_finite() {
        return Err(GradingError::invalid(
            field,
            format!("{obtained} out of {total} is not a finite amount"),
        ));
    }
    if total == 0.0 {
        return Ok(0.0);
    }
    let percentage = round_2_decimals(obtained / total * 100.0);
    require_finite(field, percentage)
}

fn subject_result_at(prefix: &str, subject: &SubjectMark) -> Result<SubjectResult, GradingError> {
    check_marks_finite(prefix, subject)?;
    let total_marks = subject.total_marks();
    let obtained_marks = subject.obtained_marks();
    let percentage = percentage_of(&format!("{prefix}marks"), obtained_marks, total_marks)?;
    Ok(SubjectResult {
        obtained_marks,
        total_marks,
        percentage,
        // A zero denominator lands on 0%, which is an F.
        grade: Grade::from_percentage(percentage),
    })
}

pub fn subject_result(subject: &SubjectMark) -> Result<SubjectResult, GradingError> {
    subject_result_at("", subject)
}

/// `present` is not clamped against `total`; range checks belong to
/// [`validate_subject`].
pub fn attendance_percentage(present: f64, total: f64) -> Result<f64, GradingError> {
    require_finite("attendance.present", present)?;
    require_finite("attendance.total", total)?;
    percentage_of("attendance", present, total)
}

/// Aggregates marks across all subjects. CGPA is the mean of the
/// per-subject grade points, so it moves in whole-grade steps rather than
/// tracking the raw percentage.
pub fn overall_result(subjects: &[SubjectMark]) -> Result<OverallResult, GradingError> {
    if subjects.is_empty() {
        return Ok(OverallResult::default());
    }

    let mut total_marks = 0.0;
    let mut obtained_marks = 0.0;
    let mut points = 0.0;
    for (idx, subject) in subjects.iter().enumerate() {
        let r = subject_result_at(&format!("subjects[{idx}]."), subject)?;
        total_marks += r.total_marks;
        obtained_marks += r.obtained_marks;
        points += r.grade.points();
    }

    let percentage = percentage_of("overall", obtained_marks, total_marks)?;
    Ok(OverallResult {
        percentage,
        grade: Grade::from_percentage(percentage),
        cgpa: round_2_decimals(points / subjects.len() as f64),
        rank: None,
        total_students: None,
    })
}

fn validate_pair(prefix: &str, part: &str, pair: &MarkPair) -> Result<(), GradingError> {
    let obtained_field = format!("{prefix}{part}.marksObtained");
    let total_field = format!("{prefix}{part}.totalMarks");
    require_finite(&obtained_field, pair.marks_obtained)?;
    require_finite(&total_field, pair.total_marks)?;
    if pair.total_marks < 0.0 {
        return Err(GradingError::invalid(total_field, "must not be negative"));
    }
    if pair.marks_obtained < 0.0 {
        return Err(GradingError::invalid(obtained_field, "must not be negative"));
    }
    if pair.marks_obtained > pair.total_marks {
        return Err(GradingError::invalid(
            obtained_field,
            format!(
                "{} exceeds total marks {}",
                pair.marks_obtained, pair.total_marks
            ),
        ));
    }
    Ok(())
}

/// Range checks applied at the input boundary before a subject is stored.
pub fn validate_subject(prefix: &str, subject: &SubjectMark) -> Result<(), GradingError> {
    if subject.subject_id.trim().is_empty() {
        return Err(GradingError::invalid(
            format!("{prefix}subjectId"),
            "must not be empty",
        ));
    }
    validate_pair(prefix, "theory", &subject.theory)?;
    validate_pair(prefix, "practical", &subject.practical)?;

    let present_field = format!("{prefix}attendance.present");
    let total_field = format!("{prefix}attendance.total");
    let a = &subject.attendance;
    require_finite(&present_field, a.present)?;
    require_finite(&total_field, a.total)?;
    if a.total < 0.0 {
        return Err(GradingError::invalid(total_field, "must not be negative"));
    }
    if a.present < 0.0 {
        return Err(GradingError::invalid(present_field, "must not be negative"));
    }
    if a.present > a.total {
        return Err(GradingError::invalid(
            present_field,
            format!("{} exceeds total days {}", a.present, a.total),
        ));
    }
    Ok(())
}

pub fn validate_subjects(subjects: &[SubjectMark]) -> Result<(), GradingError> {
    let mut seen = std::collections::HashSet::new();
    for (idx, subject) in subjects.iter().enumerate() {
        let prefix = format!("subjects[{idx}].");
        validate_subject(&prefix, subject)?;
        if !seen.insert(subject.subject_id.as_str()) {
            return Err(GradingError::invalid(
                format!("{prefix}subjectId"),
                format!("duplicate subject {}", subject.subject_id),
            ));
        }
    }
    Ok(())
}

/// Returns the subject with its attendance percentage recomputed.
pub fn with_derived_attendance(subject: &SubjectMark) -> Result<SubjectMark, GradingError> {
    let mut out = subject.clone();
    out.attendance.percentage =
        attendance_percentage(subject.attendance.present, subject.attendance.total)?;
    Ok(out)
}
