mod common;

use common::{at, first_2024, record, seeded_db};
use lms_analytics::metrics::{build_progress_report, ProgressInputs};
use lms_analytics::rollup::{course_rollup, lecturer_rollup};
use lms_analytics::store::RecordFilter;
use lms_analytics::{Database, Period};
use sqlx::Row;

async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(db.pool())
        .await
        .unwrap()
        .get("n")
}

#[tokio::test]
async fn performance_upsert_keeps_one_row_per_key() {
    let db = seeded_db().await;
    let period = first_2024();

    let original = record(1, 10, &period, [70.0, 70.0, 90.0, 70.0], 72.0, at(0));
    db.upsert_performance(&original).await.unwrap();

    let mut revised = record(1, 10, &period, [80.0, 75.0, 95.0, 77.5], 79.0, at(3));
    revised.resources_accessed = 11;
    db.upsert_performance(&revised).await.unwrap();

    assert_eq!(count(&db, "performance_records").await, 1);
    let stored = db.performance(1, 10, &period).await.unwrap().unwrap();
    assert_eq!(stored.overall_grade, 79.0);
    assert_eq!(stored.resources_accessed, 11);
    assert_eq!(stored.created_at, original.created_at);
    assert_eq!(stored.updated_at, revised.updated_at);
}

#[tokio::test]
async fn score_sheet_batch_is_all_or_nothing() {
    let db = seeded_db().await;
    let period = first_2024();
    let good = record(1, 10, &period, [70.0; 4], 70.0, at(0));
    let out_of_range = record(2, 10, &period, [70.0; 4], 150.0, at(0));

    assert!(db
        .upsert_performances(&[good.clone(), out_of_range])
        .await
        .is_err());
    assert_eq!(count(&db, "performance_records").await, 0);

    let second = record(2, 10, &period, [55.0; 4], 58.0, at(0));
    db.upsert_performances(&[good, second]).await.unwrap();
    assert_eq!(count(&db, "performance_records").await, 2);
}

#[tokio::test]
async fn missing_records_are_none() {
    let db = seeded_db().await;
    assert!(db.performance(1, 10, &first_2024()).await.unwrap().is_none());
    assert!(db.student(99).await.unwrap().is_none());
    assert!(db.course(99).await.unwrap().is_none());
    assert!(db
        .progress_report(1, 10, &first_2024())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let db = seeded_db().await;
    for (i, year) in ["2021", "2022", "2023", "2024"].iter().enumerate() {
        let period = Period::new("First", *year);
        let grade = 50.0 + i as f64 * 10.0;
        db.upsert_performance(&record(2, 10, &period, [grade; 4], grade, at(i as i64 * 100)))
            .await
            .unwrap();
    }

    let all = db.student_course_history(2, 10, None).await.unwrap();
    let grades: Vec<f64> = all.iter().map(|r| r.overall_grade).collect();
    assert_eq!(grades, vec![80.0, 70.0, 60.0, 50.0]);

    let latest_two = db.student_course_history(2, 10, Some(2)).await.unwrap();
    assert_eq!(latest_two.len(), 2);
    assert_eq!(latest_two[0].academic_year, "2024");
}

#[tokio::test]
async fn filters_combine() {
    let db = seeded_db().await;
    let period = first_2024();
    let second = Period::new("Second", "2024");
    db.upsert_performance(&record(1, 10, &period, [60.0; 4], 60.0, at(0)))
        .await
        .unwrap();
    db.upsert_performance(&record(2, 10, &second, [70.0; 4], 70.0, at(1)))
        .await
        .unwrap();
    db.upsert_performance(&record(1, 20, &period, [80.0; 4], 80.0, at(2)))
        .await
        .unwrap();

    let first_semester = db
        .performances(&RecordFilter {
            semester: Some("First".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first_semester.len(), 2);

    let student_one_course_ten = db
        .performances(&RecordFilter {
            student_id: Some(1),
            course_ids: Some(vec![10]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(student_one_course_ten.len(), 1);
    assert_eq!(student_one_course_ten[0].overall_grade, 60.0);

    let no_courses = db
        .performances(&RecordFilter {
            course_ids: Some(Vec::new()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(no_courses.is_empty());
}

#[tokio::test]
async fn rollup_upserts_are_idempotent() {
    let db = seeded_db().await;
    let period = first_2024();
    let records = vec![
        record(1, 10, &period, [80.0, 70.0, 90.0, 75.0], 75.0, at(0)),
        record(2, 10, &period, [50.0, 40.0, 60.0, 45.0], 35.0, at(0)),
    ];

    let lecturer = lecturer_rollup(100, 10, &period, &records).unwrap();
    let course = course_rollup(10, &period, &records).unwrap();
    for _ in 0..2 {
        db.upsert_lecturer_rollup(&lecturer).await.unwrap();
        db.upsert_course_rollup(&course).await.unwrap();
    }

    assert_eq!(count(&db, "lecturer_rollups").await, 1);
    assert_eq!(count(&db, "course_rollups").await, 1);

    let stored = db
        .lecturer_rollups(&RecordFilter {
            lecturer_id: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stored, vec![lecturer]);

    let courses = db.course_rollups(&RecordFilter::default()).await.unwrap();
    assert_eq!(courses, vec![course]);
}

#[tokio::test]
async fn allocations_and_lecturer_courses() {
    let db = seeded_db().await;
    db.allocate_course(100, 20).await.unwrap();
    db.allocate_course(100, 20).await.unwrap();

    assert_eq!(db.lecturer_courses(100).await.unwrap(), vec![10, 20]);
    assert!(db.is_allocated(200, 20).await.unwrap());
    assert!(!db.is_allocated(200, 10).await.unwrap());
    assert_eq!(
        db.course_allocations().await.unwrap(),
        vec![(100, 10), (100, 20), (200, 20)]
    );
}

#[tokio::test]
async fn progress_report_round_trip_and_overwrite() {
    let db = seeded_db().await;
    let period = first_2024();
    let inputs = ProgressInputs {
        attended_classes: 18,
        total_classes: 20,
        completed_assignments: 4,
        total_assignments: 5,
        quiz_scores: vec![65.0, 72.0],
        midterm_score: 70.0,
        final_score: 74.0,
    };
    let report = build_progress_report(3, 10, &period, &inputs);
    db.upsert_progress_report(&report).await.unwrap();
    db.upsert_progress_report(&report).await.unwrap();

    assert_eq!(count(&db, "progress_reports").await, 1);
    let stored = db.progress_report(3, 10, &period).await.unwrap().unwrap();
    assert_eq!(stored, report);
}

#[tokio::test]
async fn migrate_is_repeatable() {
    let db = seeded_db().await;
    db.migrate().await.unwrap();
    assert_eq!(count(&db, "courses").await, 2);
}
