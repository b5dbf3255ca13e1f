#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use lms_analytics::render::PdfRenderer;
use lms_analytics::{AnalyticsService, Course, Database, Period, PerformanceRecord, Student};

pub fn first_2024() -> Period {
    Period::new("First", "2024")
}

pub fn at(days: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap() + Duration::days(days)
}

pub fn record(
    student_id: i64,
    course_id: i64,
    period: &Period,
    scores: [f64; 4],
    overall: f64,
    created_at: DateTime<Utc>,
) -> PerformanceRecord {
    let [quiz, assignment, attendance, participation] = scores;
    PerformanceRecord {
        student_id,
        course_id,
        semester: period.semester.clone(),
        academic_year: period.academic_year.clone(),
        quiz_average: quiz,
        assignment_average: assignment,
        attendance_rate: attendance,
        participation_score: participation,
        overall_grade: overall,
        resources_accessed: 6,
        discussion_participation: 2,
        assignments_submitted: 3,
        time_spent_learning_secs: 7200,
        created_at,
        updated_at: created_at,
    }
}

pub async fn seeded_db() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.upsert_course(&Course {
        id: 10,
        code: "CSC201".to_string(),
        title: "Data Structures".to_string(),
        level: "200".to_string(),
    })
    .await
    .unwrap();
    db.upsert_course(&Course {
        id: 20,
        code: "MTH101".to_string(),
        title: "Calculus I".to_string(),
        level: "100".to_string(),
    })
    .await
    .unwrap();
    for (id, name) in [(1, "Amina Odhiambo"), (2, "Brian Kiptoo"), (3, "Cynthia Wanjiku")] {
        db.upsert_student(&Student {
            id,
            student_no: format!("TUK-2024-{id}"),
            full_name: name.to_string(),
            email: format!("student{id}@example.com"),
        })
        .await
        .unwrap();
    }
    // Lecturer 100 teaches course 10, lecturer 200 teaches course 20.
    db.allocate_course(100, 10).await.unwrap();
    db.allocate_course(200, 20).await.unwrap();
    db
}

pub async fn service(media_root: &std::path::Path) -> AnalyticsService {
    AnalyticsService::new(seeded_db().await, PdfRenderer::default(), media_root)
}
