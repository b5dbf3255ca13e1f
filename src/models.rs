use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type StudentId = i64;
pub type CourseId = i64;
pub type UserId = i64;

/// Expected resource interactions per enrolled student for a course to count as fully used.
pub const EXPECTED_INTERACTIONS_PER_STUDENT: f64 = 20.0;

/// Semester and academic year pair that scopes every record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    pub semester: String,
    pub academic_year: String,
}

impl Period {
    pub fn new(semester: impl Into<String>, academic_year: impl Into<String>) -> Self {
        Self {
            semester: semester.into(),
            academic_year: academic_year.into(),
        }
    }

    pub fn matches(&self, semester: &str, academic_year: &str) -> bool {
        self.semester == semester && self.academic_year == academic_year
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.semester, self.academic_year)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Lecturer,
    Staff,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "lecturer" => Some(Role::Lecturer),
            "staff" | "admin" => Some(Role::Staff),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct Student {
    pub id: StudentId,
    pub student_no: String,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub title: String,
    pub level: String,
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.code)
    }
}

/// Per student, course, semester and academic year. Unique on that 4-tuple.
///
/// `overall_grade` is normally close to [`crate::metrics::weighted_overall_grade`]
/// of the other four percentages but is stored as given.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct PerformanceRecord {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub semester: String,
    pub academic_year: String,
    pub quiz_average: f64,
    pub assignment_average: f64,
    pub attendance_rate: f64,
    pub participation_score: f64,
    pub overall_grade: f64,
    pub resources_accessed: i64,
    pub discussion_participation: i64,
    pub assignments_submitted: i64,
    pub time_spent_learning_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn period(&self) -> Period {
        Period::new(self.semester.clone(), self.academic_year.clone())
    }

    pub fn in_period(&self, period: &Period) -> bool {
        period.matches(&self.semester, &self.academic_year)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct CourseRollup {
    pub course_id: CourseId,
    pub semester: String,
    pub academic_year: String,
    pub enrollment_count: i64,
    pub completion_rate: f64,
    pub dropout_rate: f64,
    pub average_grade: f64,
    pub resource_views: i64,
    pub discussion_posts: i64,
    pub assignment_submissions: i64,
}

impl CourseRollup {
    /// Resource interactions as a percentage of the expected amount, capped at 100.
    pub fn resource_usage(&self) -> f64 {
        if self.enrollment_count <= 0 {
            return 0.0;
        }
        let interactions =
            (self.resource_views + self.discussion_posts + self.assignment_submissions) as f64;
        let expected = self.enrollment_count as f64 * EXPECTED_INTERACTIONS_PER_STUDENT;
        let usage = (interactions / expected) * 100.0;
        round1(usage.min(100.0))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct LecturerRollup {
    pub lecturer_id: UserId,
    pub course_id: CourseId,
    pub semester: String,
    pub academic_year: String,
    pub student_satisfaction: f64,
    pub course_completion_rate: f64,
    pub average_student_grade: f64,
    pub resource_utilization: f64,
    pub feedback_responses: i64,
    pub active_engagement: f64,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
