use serde::{Deserialize, Serialize};

use crate::metrics::{mean, percentage, PASS_MARK};
use crate::models::{
    round1, CourseId, CourseRollup, LecturerRollup, Period, PerformanceRecord, UserId,
};

/// Overall grade below which a student is counted as dropping out.
pub const DROPOUT_THRESHOLD: f64 = 40.0;
/// Resources each student is expected to open over a course.
pub const EXPECTED_RESOURCES_PER_STUDENT: i64 = 10;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PerformanceSummary {
    pub total_records: usize,
    pub avg_quiz: f64,
    pub avg_assignment: f64,
    pub avg_attendance: f64,
    pub avg_participation: f64,
    pub avg_overall: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct LecturerSummary {
    pub total_rollups: usize,
    pub avg_satisfaction: f64,
    pub avg_completion: f64,
    pub avg_grade: f64,
    pub avg_resource: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CourseProgressSummary {
    pub total_enrollments: i64,
    pub avg_completion_rate: f64,
    pub avg_dropout_rate: f64,
    pub avg_resource_usage: f64,
}

fn share<F>(records: &[&PerformanceRecord], predicate: F) -> f64
where
    F: Fn(&PerformanceRecord) -> bool,
{
    let hits = records.iter().filter(|r| predicate(r)).count();
    percentage(hits as f64, records.len() as f64)
}

fn matching<'a>(
    records: &'a [PerformanceRecord],
    course_id: CourseId,
    period: &Period,
) -> Vec<&'a PerformanceRecord> {
    records
        .iter()
        .filter(|r| r.course_id == course_id && r.in_period(period))
        .collect()
}

/// Recomputes the course rollup from its performance records.
/// `None` means there is nothing to roll up and no row should be written.
pub fn course_rollup(
    course_id: CourseId,
    period: &Period,
    records: &[PerformanceRecord],
) -> Option<CourseRollup> {
    let scoped = matching(records, course_id, period);
    if scoped.is_empty() {
        return None;
    }

    Some(CourseRollup {
        course_id,
        semester: period.semester.clone(),
        academic_year: period.academic_year.clone(),
        enrollment_count: scoped.len() as i64,
        completion_rate: share(&scoped, |r| r.overall_grade >= PASS_MARK),
        dropout_rate: share(&scoped, |r| r.overall_grade < DROPOUT_THRESHOLD),
        average_grade: mean(scoped.iter().map(|r| r.overall_grade)),
        resource_views: scoped.iter().map(|r| r.resources_accessed).sum(),
        discussion_posts: scoped.iter().map(|r| r.discussion_participation).sum(),
        assignment_submissions: scoped.iter().map(|r| r.assignments_submitted).sum(),
    })
}

/// Recomputes a lecturer's rollup for one course. Every student of the course
/// counts, whichever lecturer entered the scores.
pub fn lecturer_rollup(
    lecturer_id: UserId,
    course_id: CourseId,
    period: &Period,
    records: &[PerformanceRecord],
) -> Option<LecturerRollup> {
    let scoped = matching(records, course_id, period);
    if scoped.is_empty() {
        return None;
    }

    let total_students = scoped.len() as i64;
    let avg_quiz = mean(scoped.iter().map(|r| r.quiz_average));
    let avg_assignment = mean(scoped.iter().map(|r| r.assignment_average));
    let total_resources: i64 = scoped.iter().map(|r| r.resources_accessed).sum();
    let expected_resources = total_students * EXPECTED_RESOURCES_PER_STUDENT;

    Some(LecturerRollup {
        lecturer_id,
        course_id,
        semester: period.semester.clone(),
        academic_year: period.academic_year.clone(),
        student_satisfaction: (avg_quiz + avg_assignment) / 2.0,
        course_completion_rate: share(&scoped, |r| r.overall_grade >= PASS_MARK),
        average_student_grade: mean(scoped.iter().map(|r| r.overall_grade)),
        resource_utilization: percentage(total_resources as f64, expected_resources as f64),
        feedback_responses: scoped.iter().map(|r| r.discussion_participation).sum(),
        active_engagement: mean(scoped.iter().map(|r| r.participation_score)),
    })
}

pub fn summarize_performance(records: &[PerformanceRecord]) -> PerformanceSummary {
    PerformanceSummary {
        total_records: records.len(),
        avg_quiz: mean(records.iter().map(|r| r.quiz_average)),
        avg_assignment: mean(records.iter().map(|r| r.assignment_average)),
        avg_attendance: mean(records.iter().map(|r| r.attendance_rate)),
        avg_participation: mean(records.iter().map(|r| r.participation_score)),
        avg_overall: mean(records.iter().map(|r| r.overall_grade)),
    }
}

pub fn summarize_lecturers(rollups: &[LecturerRollup]) -> LecturerSummary {
    LecturerSummary {
        total_rollups: rollups.len(),
        avg_satisfaction: mean(rollups.iter().map(|r| r.student_satisfaction)),
        avg_completion: mean(rollups.iter().map(|r| r.course_completion_rate)),
        avg_grade: mean(rollups.iter().map(|r| r.average_student_grade)),
        avg_resource: mean(rollups.iter().map(|r| r.resource_utilization)),
    }
}

pub fn summarize_courses(rollups: &[CourseRollup]) -> CourseProgressSummary {
    let avg_resource_usage = mean(rollups.iter().map(|r| r.resource_usage())).min(100.0);

    CourseProgressSummary {
        total_enrollments: rollups.iter().map(|r| r.enrollment_count).sum(),
        avg_completion_rate: round1(mean(rollups.iter().map(|r| r.completion_rate))),
        avg_dropout_rate: round1(mean(rollups.iter().map(|r| r.dropout_rate))),
        avg_resource_usage: round1(avg_resource_usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(student_id: i64, quiz: f64, assignment: f64, overall: f64, resources: i64) -> PerformanceRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        PerformanceRecord {
            student_id,
            course_id: 10,
            semester: "First".to_string(),
            academic_year: "2024".to_string(),
            quiz_average: quiz,
            assignment_average: assignment,
            attendance_rate: 90.0,
            participation_score: (quiz + assignment) / 2.0,
            overall_grade: overall,
            resources_accessed: resources,
            discussion_participation: 2,
            assignments_submitted: 4,
            time_spent_learning_secs: 3600,
            created_at: at,
            updated_at: at,
        }
    }

    fn period() -> Period {
        Period::new("First", "2024")
    }

    #[test]
    fn empty_key_set_yields_no_rollup() {
        assert!(course_rollup(10, &period(), &[]).is_none());
        assert!(lecturer_rollup(1, 10, &period(), &[]).is_none());
    }

    #[test]
    fn records_outside_the_key_are_ignored() {
        let mut other = record(1, 50.0, 50.0, 50.0, 5);
        other.semester = "Second".to_string();
        assert!(course_rollup(10, &period(), &[other]).is_none());
        assert!(lecturer_rollup(1, 99, &period(), &[record(2, 1.0, 1.0, 1.0, 1)]).is_none());
    }

    #[test]
    fn lecturer_rollup_metrics() {
        let records = vec![
            record(1, 80.0, 70.0, 75.0, 12),
            record(2, 60.0, 50.0, 55.0, 8),
            record(3, 70.0, 90.0, 30.0, 15),
        ];
        let rollup = lecturer_rollup(4, 10, &period(), &records).unwrap();

        assert!((rollup.student_satisfaction - 70.0).abs() < 1e-9);
        assert!((rollup.course_completion_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!((rollup.average_student_grade - 160.0 / 3.0).abs() < 1e-9);
        assert!((rollup.resource_utilization - 35.0 / 30.0 * 100.0).abs() < 1e-9);
        assert_eq!(rollup.feedback_responses, 6);
    }

    #[test]
    fn resource_utilization_is_not_capped() {
        let records = vec![record(1, 80.0, 80.0, 80.0, 25)];
        let rollup = lecturer_rollup(4, 10, &period(), &records).unwrap();
        assert_eq!(rollup.resource_utilization, 250.0);
    }

    #[test]
    fn course_rates_use_independent_thresholds() {
        let records = vec![
            record(1, 80.0, 70.0, 75.0, 12),
            record(2, 60.0, 50.0, 50.0, 8),
            record(3, 70.0, 90.0, 30.0, 15),
            record(4, 70.0, 90.0, 90.0, 15),
        ];
        let rollup = course_rollup(10, &period(), &records).unwrap();

        assert_eq!(rollup.enrollment_count, 4);
        assert_eq!(rollup.completion_rate, 50.0);
        assert_eq!(rollup.dropout_rate, 25.0);
        assert!(rollup.completion_rate + rollup.dropout_rate < 100.0);
        assert_eq!(rollup.resource_views, 50);
        assert_eq!(rollup.discussion_posts, 8);
        assert_eq!(rollup.assignment_submissions, 16);
    }

    #[test]
    fn rollups_are_idempotent() {
        let records = vec![record(1, 81.5, 72.25, 66.0, 3), record(2, 45.0, 99.0, 71.0, 9)];
        let first = lecturer_rollup(4, 10, &period(), &records);
        let second = lecturer_rollup(4, 10, &period(), &records);
        assert_eq!(first, second);
        assert_eq!(
            course_rollup(10, &period(), &records),
            course_rollup(10, &period(), &records)
        );
    }

    #[test]
    fn summaries_of_nothing_are_zero() {
        assert_eq!(summarize_performance(&[]), PerformanceSummary::default());
        assert_eq!(summarize_lecturers(&[]), LecturerSummary::default());
        assert_eq!(summarize_courses(&[]), CourseProgressSummary::default());
    }

    #[test]
    fn course_summary_rounds_and_caps() {
        let records = vec![record(1, 80.0, 70.0, 75.0, 400)];
        let rollup = course_rollup(10, &period(), &records).unwrap();
        let summary = summarize_courses(&[rollup]);
        assert_eq!(summary.total_enrollments, 1);
        assert_eq!(summary.avg_resource_usage, 100.0);
        assert_eq!(summary.avg_completion_rate, 100.0);
    }
}
