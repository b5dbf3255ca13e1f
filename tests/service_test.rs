mod common;

use common::{at, first_2024, record, service};
use lms_analytics::insights::{LearningStyle, PerformanceTrend, Priority};
use lms_analytics::metrics::{ParticipationLevel, ProgressInputs, ScoreEntry};
use lms_analytics::{AnalyticsError, Period};

fn entry(student_id: i64, quiz: f64, assignment: f64, attendance: f64, total: f64) -> ScoreEntry {
    ScoreEntry {
        student_id,
        quiz: Some(quiz),
        assignment: Some(assignment),
        attendance: Some(attendance),
        total: Some(total),
        ..Default::default()
    }
}

#[tokio::test]
async fn score_entry_refreshes_the_lecturer_rollup() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();

    let outcome = service
        .record_scores(
            100,
            10,
            &period,
            &[entry(1, 80.0, 70.0, 90.0, 75.0), entry(2, 60.0, 50.0, 70.0, 55.0)],
        )
        .await
        .unwrap();

    assert_eq!(outcome.saved, 2);
    let rollup = outcome.lecturer_rollup.unwrap();
    assert_eq!(rollup.lecturer_id, 100);
    assert_eq!(rollup.student_satisfaction, 65.0);
    assert_eq!(rollup.course_completion_rate, 50.0);
    assert_eq!(rollup.average_student_grade, 65.0);
    assert_eq!(rollup.active_engagement, 65.0);

    let stored = service.db().performance(2, 10, &period).await.unwrap().unwrap();
    assert_eq!(stored.participation_score, 55.0);
    assert_eq!(stored.overall_grade, 55.0);
}

#[tokio::test]
async fn empty_score_sheet_writes_nothing() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;

    let outcome = service.record_scores(100, 10, &first_2024(), &[]).await.unwrap();
    assert_eq!(outcome.saved, 0);
    assert!(outcome.lecturer_rollup.is_none());
}

#[tokio::test]
async fn re_entering_scores_keeps_activity_counters() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();

    let mut first = entry(1, 70.0, 70.0, 80.0, 70.0);
    first.resources_accessed = Some(14);
    service.record_scores(100, 10, &period, &[first]).await.unwrap();
    service
        .record_scores(100, 10, &period, &[entry(1, 90.0, 85.0, 95.0, 88.0)])
        .await
        .unwrap();

    let stored = service.db().performance(1, 10, &period).await.unwrap().unwrap();
    assert_eq!(stored.overall_grade, 88.0);
    assert_eq!(stored.resources_accessed, 14);
}

#[tokio::test]
async fn csv_import_treats_blank_cells_as_zero() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();

    let csv = "student_id,quiz,assignment,attendance,total\n1,75,80,90,78\n2,,65,70,40\n";
    let outcome = service
        .import_scores_csv(100, 10, &period, csv.as_bytes())
        .await
        .unwrap();
    assert_eq!(outcome.saved, 2);

    let second = service.db().performance(2, 10, &period).await.unwrap().unwrap();
    assert_eq!(second.quiz_average, 0.0);
    assert_eq!(second.participation_score, 0.0);
    assert_eq!(second.assignment_average, 65.0);
}

#[tokio::test]
async fn malformed_csv_is_rejected() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;

    let csv = "student_id,quiz,assignment,attendance,total\nnot-a-number,1,2,3,4\n";
    let err = service
        .import_scores_csv(100, 10, &first_2024(), csv.as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::Csv(_)));
}

#[tokio::test]
async fn refresh_all_skips_courses_without_records() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();
    service
        .db()
        .upsert_performance(&record(1, 10, &period, [70.0; 4], 70.0, at(0)))
        .await
        .unwrap();

    let refreshed = service.refresh_all_lecturer_rollups(&period).await.unwrap();
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].lecturer_id, 100);
    assert_eq!(refreshed[0].course_id, 10);
}

#[tokio::test]
async fn course_rollup_needs_records() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();

    assert!(service.refresh_course_rollup(10, &period).await.unwrap().is_none());

    for (student, grade) in [(1, 75.0), (2, 35.0), (3, 50.0)] {
        service
            .db()
            .upsert_performance(&record(student, 10, &period, [grade; 4], grade, at(0)))
            .await
            .unwrap();
    }
    let rollup = service.refresh_course_rollup(10, &period).await.unwrap().unwrap();
    assert_eq!(rollup.enrollment_count, 3);
    assert!((rollup.completion_rate - 100.0 / 3.0).abs() < 1e-9);
    assert!((rollup.dropout_rate - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(rollup.resource_views, 18);
}

#[tokio::test]
async fn insight_uses_prior_records_in_order() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;

    assert!(service.student_insight(1, 10).await.unwrap().is_none());

    for (i, (year, grade)) in [("2021", 60.0), ("2022", 65.0), ("2023", 70.0), ("2024", 72.0)]
        .into_iter()
        .enumerate()
    {
        let period = Period::new("First", year);
        service
            .db()
            .upsert_performance(&record(1, 10, &period, [65.0, 68.0, 75.0, 55.0], grade, at(i as i64 * 120)))
            .await
            .unwrap();
    }

    let result = service.student_insight(1, 10).await.unwrap().unwrap();
    assert_eq!(result.record.academic_year, "2024");
    assert_eq!(result.history, vec![60.0, 65.0, 70.0]);
    assert_eq!(result.insight.performance_trend, PerformanceTrend::StrongUpward);
    assert_eq!(result.insight.learning_style, LearningStyle::ProjectBased);

    let priorities: Vec<Priority> = result
        .insight
        .recommendations
        .iter()
        .map(|r| r.priority)
        .collect();
    assert_eq!(
        priorities,
        vec![Priority::High, Priority::High, Priority::Medium, Priority::Medium]
    );
}

#[tokio::test]
async fn short_history_has_no_trend() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    for (i, year) in ["2023", "2024"].into_iter().enumerate() {
        service
            .db()
            .upsert_performance(&record(2, 10, &Period::new("First", year), [50.0; 4], 50.0, at(i as i64)))
            .await
            .unwrap();
    }

    let result = service.student_insight(2, 10).await.unwrap().unwrap();
    assert_eq!(result.insight.performance_trend, PerformanceTrend::InsufficientData);
}

#[tokio::test]
async fn patterns_for_an_empty_course() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    assert!(service.course_patterns(10, &first_2024()).await.unwrap().is_empty());
}

#[tokio::test]
async fn patterns_cover_the_whole_cohort() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();
    let cohort = [
        (1, [35.0, 40.0, 55.0, 30.0], 38.0),
        (2, [38.0, 42.0, 60.0, 33.0], 41.0),
        (3, [62.0, 58.0, 75.0, 60.0], 61.0),
        (4, [65.0, 61.0, 78.0, 64.0], 63.0),
        (5, [90.0, 88.0, 97.0, 91.0], 90.0),
        (6, [93.0, 85.0, 95.0, 89.0], 91.0),
    ];
    for (student, scores, overall) in cohort {
        service
            .db()
            .upsert_performance(&record(student, 10, &period, scores, overall, at(0)))
            .await
            .unwrap();
    }

    let patterns = service.course_patterns(10, &period).await.unwrap();
    assert!(!patterns.is_empty() && patterns.len() <= 3);
    assert_eq!(patterns.iter().map(|p| p.count).sum::<usize>(), cohort.len());
    assert_eq!(patterns[0].pattern_type, "Learning Pattern 1");
}

#[tokio::test]
async fn progress_report_is_saved() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();
    let inputs = ProgressInputs {
        attended_classes: 19,
        total_classes: 20,
        completed_assignments: 5,
        total_assignments: 5,
        quiz_scores: vec![88.0, 92.0],
        midterm_score: 85.0,
        final_score: 90.0,
    };

    let report = service
        .generate_progress_report(1, 10, &period, &inputs)
        .await
        .unwrap();
    assert_eq!(report.participation_level, ParticipationLevel::High);
    assert!(report.areas_for_improvement.is_empty());

    let stored = service.db().progress_report(1, 10, &period).await.unwrap();
    assert_eq!(stored, Some(report));
}

#[tokio::test]
async fn impossible_progress_inputs_are_rejected() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let inputs = ProgressInputs {
        attended_classes: 25,
        total_classes: 20,
        ..Default::default()
    };

    let err = service
        .generate_progress_report(1, 10, &first_2024(), &inputs)
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::InvalidInput(_)));
}

#[tokio::test]
async fn result_sheet_is_written_under_media_root() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = Period::new("First", "2023/2024");
    for (student, grade) in [(1, 82.0), (2, 31.0), (3, 64.0)] {
        service
            .db()
            .upsert_performance(&record(student, 10, &period, [grade; 4], grade, at(0)))
            .await
            .unwrap();
    }

    let sheet = service
        .result_sheet(100, Some("Dr. Achieng"), 10, &period)
        .await
        .unwrap();
    assert_eq!(
        sheet.path,
        media
            .path()
            .join("result_sheet")
            .join("First_semester_20232024_CSC201_resultSheet.pdf")
    );
    assert!(sheet.bytes.starts_with(b"%PDF"));
    assert!(sheet.path.exists());
}

#[tokio::test]
async fn result_sheet_for_unknown_course() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let err = service
        .result_sheet(100, None, 404, &first_2024())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::NotFound(_)));
}

#[tokio::test]
async fn dashboard_summarises_stored_rollups() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path()).await;
    let period = first_2024();
    service
        .record_scores(100, 10, &period, &[entry(1, 80.0, 60.0, 90.0, 70.0)])
        .await
        .unwrap();
    service.refresh_course_rollup(10, &period).await.unwrap();

    let view = service.dashboard(Some(&period), None).await.unwrap();
    assert_eq!(view.performance.total_records, 1);
    assert_eq!(view.lecturers.total_rollups, 1);
    assert_eq!(view.courses.total_enrollments, 1);
    assert_eq!(view.period.as_deref(), Some("First 2024"));

    let other = service
        .dashboard(Some(&Period::new("Second", "2024")), None)
        .await
        .unwrap();
    assert_eq!(other.performance.total_records, 0);
    assert_eq!(other.performance.avg_overall, 0.0);
}
