use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CourseId, Period, PerformanceRecord, StudentId};

/// Grade at or above which a student counts as having completed a course.
pub const PASS_MARK: f64 = 60.0;

const PROGRESS_STRENGTH_THRESHOLD: f64 = 80.0;
const PROGRESS_RECOMMENDATION: &str =
    "Continue current study habits and focus on identified areas for improvement.";

/// A lecturer's score-sheet line for one student. Missing scores count as 0.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ScoreEntry {
    pub student_id: StudentId,
    #[serde(default)]
    pub quiz: Option<f64>,
    #[serde(default)]
    pub assignment: Option<f64>,
    #[serde(default)]
    pub attendance: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub assignments_submitted: Option<i64>,
    #[serde(default)]
    pub resources_accessed: Option<i64>,
    #[serde(default)]
    pub discussion_participation: Option<i64>,
}

/// Raw counts behind a composite progress report.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProgressInputs {
    pub attended_classes: u32,
    pub total_classes: u32,
    pub completed_assignments: u32,
    pub total_assignments: u32,
    /// One score per quiz sitting.
    #[serde(default)]
    pub quiz_scores: Vec<f64>,
    pub midterm_score: f64,
    pub final_score: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationLevel {
    Low,
    Medium,
    High,
}

impl ParticipationLevel {
    pub fn from_grade(overall_grade: f64) -> Self {
        if overall_grade >= 85.0 {
            ParticipationLevel::High
        } else if overall_grade >= 70.0 {
            ParticipationLevel::Medium
        } else {
            ParticipationLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationLevel::Low => "low",
            ParticipationLevel::Medium => "medium",
            ParticipationLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "high" => ParticipationLevel::High,
            "low" => ParticipationLevel::Low,
            _ => ParticipationLevel::Medium,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProgressReport {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub semester: String,
    pub academic_year: String,
    pub attendance_rate: f64,
    pub assignment_completion: f64,
    pub quiz_scores: f64,
    pub midterm_score: f64,
    pub final_score: f64,
    pub overall_grade: f64,
    pub participation_level: ParticipationLevel,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub recommendations: String,
}

/// `part / whole * 100`, or 0 when there is nothing to divide by.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        (part / whole) * 100.0
    }
}

pub fn attendance_rate(attended_classes: u32, total_classes: u32) -> f64 {
    percentage(attended_classes as f64, total_classes as f64)
}

pub fn assignment_completion(completed: u32, total_assignments: u32) -> f64 {
    percentage(completed as f64, total_assignments as f64)
}

pub fn participation_score(quiz: Option<f64>, assignment: Option<f64>) -> f64 {
    match (quiz, assignment) {
        (Some(quiz), Some(assignment)) => (quiz + assignment) / 2.0,
        _ => 0.0,
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Arithmetic mean, 0 for an empty input.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Record-level weighting: quiz 0.3, assignment 0.4, attendance 0.15, participation 0.15.
pub fn weighted_overall_grade(
    quiz_average: f64,
    assignment_average: f64,
    attendance_rate: f64,
    participation_score: f64,
) -> f64 {
    quiz_average * 0.3
        + assignment_average * 0.4
        + attendance_rate * 0.15
        + participation_score * 0.15
}

/// Progress-report weighting: attendance 0.10, assignment completion 0.20, quiz 0.20,
/// midterm 0.25, final 0.25. Deliberately not the same as [`weighted_overall_grade`].
pub fn composite_overall_grade(
    attendance_rate: f64,
    assignment_completion: f64,
    quiz_scores: f64,
    midterm_score: f64,
    final_score: f64,
) -> f64 {
    attendance_rate * 0.1
        + assignment_completion * 0.2
        + quiz_scores * 0.2
        + midterm_score * 0.25
        + final_score * 0.25
}

/// Turns a score-sheet line into a performance record. `overall_grade` is the
/// lecturer-entered total, not recomputed.
pub fn performance_from_scores(
    entry: &ScoreEntry,
    course_id: CourseId,
    period: &Period,
    now: DateTime<Utc>,
) -> PerformanceRecord {
    let quiz = entry.quiz.map(clamp_percent);
    let assignment = entry.assignment.map(clamp_percent);

    PerformanceRecord {
        student_id: entry.student_id,
        course_id,
        semester: period.semester.clone(),
        academic_year: period.academic_year.clone(),
        quiz_average: quiz.unwrap_or(0.0),
        assignment_average: assignment.unwrap_or(0.0),
        attendance_rate: entry.attendance.map(clamp_percent).unwrap_or(0.0),
        participation_score: participation_score(quiz, assignment),
        overall_grade: entry.total.map(clamp_percent).unwrap_or(0.0),
        resources_accessed: entry.resources_accessed.unwrap_or(0).max(0),
        discussion_participation: entry.discussion_participation.unwrap_or(0).max(0),
        assignments_submitted: entry.assignments_submitted.unwrap_or(0).max(0),
        time_spent_learning_secs: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn build_progress_report(
    student_id: StudentId,
    course_id: CourseId,
    period: &Period,
    inputs: &ProgressInputs,
) -> ProgressReport {
    let attendance = attendance_rate(inputs.attended_classes, inputs.total_classes);
    let completion = assignment_completion(inputs.completed_assignments, inputs.total_assignments);
    let quiz = mean(inputs.quiz_scores.iter().copied());

    let overall_grade = composite_overall_grade(
        attendance,
        completion,
        quiz,
        inputs.midterm_score,
        inputs.final_score,
    );

    let mut strengths = Vec::new();
    let mut areas_for_improvement = Vec::new();

    let checks = [
        (
            attendance,
            "Good attendance record",
            "Improve attendance",
        ),
        (
            completion,
            "Consistent assignment completion",
            "Complete more assignments",
        ),
        (
            quiz,
            "Strong quiz performance",
            "Focus on quiz preparation",
        ),
    ];
    for (value, strength, weakness) in checks {
        if value >= PROGRESS_STRENGTH_THRESHOLD {
            strengths.push(strength.to_string());
        } else {
            areas_for_improvement.push(weakness.to_string());
        }
    }

    ProgressReport {
        student_id,
        course_id,
        semester: period.semester.clone(),
        academic_year: period.academic_year.clone(),
        attendance_rate: attendance,
        assignment_completion: completion,
        quiz_scores: quiz,
        midterm_score: inputs.midterm_score,
        final_score: inputs.final_score,
        overall_grade,
        participation_level: ParticipationLevel::from_grade(overall_grade),
        strengths,
        areas_for_improvement,
        recommendations: PROGRESS_RECOMMENDATION.to_string(),
    }
}

/// Letter grade and grade point for a result-sheet total.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct GradePoint {
    pub grade: &'static str,
    pub point: f64,
}

impl GradePoint {
    pub fn passed(&self) -> bool {
        self.grade != "F"
    }

    pub fn comment(&self) -> &'static str {
        if self.passed() {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

const GRADE_SCALE: [(f64, &str, f64); 10] = [
    (90.0, "A+", 4.0),
    (85.0, "A", 4.0),
    (80.0, "A-", 3.75),
    (75.0, "B+", 3.5),
    (70.0, "B", 3.0),
    (65.0, "B-", 2.75),
    (60.0, "C+", 2.5),
    (50.0, "C", 2.0),
    (45.0, "C-", 1.75),
    (40.0, "D", 1.0),
];

pub fn grade_for(total: f64) -> GradePoint {
    GRADE_SCALE
        .iter()
        .find(|(min, _, _)| total >= *min)
        .map(|&(_, grade, point)| GradePoint { grade, point })
        .unwrap_or(GradePoint {
            grade: "F",
            point: 0.0,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> Period {
        Period::new("First", "2024")
    }

    #[test]
    fn rates_guard_division_by_zero() {
        assert_eq!(attendance_rate(5, 0), 0.0);
        assert_eq!(assignment_completion(3, 0), 0.0);
        assert_eq!(attendance_rate(25, 30), 25.0 / 30.0 * 100.0);
        assert_eq!(assignment_completion(8, 10), 80.0);
    }

    #[test]
    fn participation_needs_both_scores() {
        assert_eq!(participation_score(Some(70.0), Some(90.0)), 80.0);
        assert_eq!(participation_score(Some(70.0), None), 0.0);
        assert_eq!(participation_score(None, None), 0.0);
    }

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(mean(Vec::<f64>::new()), 0.0);
        assert_eq!(mean(vec![50.0, 70.0]), 60.0);
    }

    #[test]
    fn the_two_weightings_stay_distinct() {
        let record_level = weighted_overall_grade(80.0, 70.0, 90.0, 60.0);
        assert!((record_level - (24.0 + 28.0 + 13.5 + 9.0)).abs() < 1e-9);

        let composite = composite_overall_grade(80.0, 70.0, 90.0, 60.0, 50.0);
        assert!((composite - (8.0 + 14.0 + 18.0 + 15.0 + 12.5)).abs() < 1e-9);
    }

    #[test]
    fn score_entry_keeps_lecturer_total() {
        let entry = ScoreEntry {
            student_id: 7,
            quiz: Some(60.0),
            assignment: Some(80.0),
            attendance: Some(120.0),
            total: Some(55.0),
            ..Default::default()
        };
        let record = performance_from_scores(&entry, 3, &period(), Utc::now());

        assert_eq!(record.participation_score, 70.0);
        assert_eq!(record.attendance_rate, 100.0);
        assert_eq!(record.overall_grade, 55.0);
        assert_eq!(record.course_id, 3);
        assert_eq!(record.semester, "First");
    }

    #[test]
    fn empty_score_entry_is_all_zero() {
        let entry = ScoreEntry {
            student_id: 1,
            ..Default::default()
        };
        let record = performance_from_scores(&entry, 1, &period(), Utc::now());
        assert_eq!(record.quiz_average, 0.0);
        assert_eq!(record.participation_score, 0.0);
        assert_eq!(record.overall_grade, 0.0);
    }

    #[test]
    fn progress_report_uses_composite_weights() {
        let inputs = ProgressInputs {
            attended_classes: 25,
            total_classes: 30,
            completed_assignments: 8,
            total_assignments: 10,
            quiz_scores: vec![70.0, 90.0],
            midterm_score: 75.0,
            final_score: 80.0,
        };
        let report = build_progress_report(1, 2, &period(), &inputs);

        let attendance = 25.0 / 30.0 * 100.0;
        let expected = attendance * 0.1 + 80.0 * 0.2 + 80.0 * 0.2 + 75.0 * 0.25 + 80.0 * 0.25;
        assert!((report.overall_grade - expected).abs() < 1e-9);
        assert_eq!(report.participation_level, ParticipationLevel::Medium);
        assert_eq!(
            report.strengths,
            vec![
                "Good attendance record",
                "Consistent assignment completion",
                "Strong quiz performance"
            ]
        );
        assert!(report.areas_for_improvement.is_empty());
    }

    #[test]
    fn progress_report_without_activity_is_low() {
        let report = build_progress_report(1, 2, &period(), &ProgressInputs::default());
        assert_eq!(report.overall_grade, 0.0);
        assert_eq!(report.participation_level, ParticipationLevel::Low);
        assert_eq!(report.areas_for_improvement.len(), 3);
    }

    #[test]
    fn grade_scale_boundaries() {
        assert_eq!(grade_for(90.0).grade, "A+");
        assert_eq!(grade_for(89.9).grade, "A");
        assert_eq!(grade_for(80.0).point, 3.75);
        assert_eq!(grade_for(64.5).grade, "C+");
        assert_eq!(grade_for(40.0).grade, "D");
        assert_eq!(grade_for(40.0).comment(), "PASS");

        let failed = grade_for(39.9);
        assert_eq!(failed.grade, "F");
        assert_eq!(failed.point, 0.0);
        assert_eq!(failed.comment(), "FAIL");
    }
}
