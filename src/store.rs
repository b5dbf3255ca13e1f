use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, QueryBuilder, Row, Sqlite};

use crate::metrics::{ParticipationLevel, ProgressReport};
use crate::models::{
    Course, CourseId, CourseRollup, LecturerRollup, Period, PerformanceRecord, Student, StudentId,
    UserId,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id INTEGER PRIMARY KEY,
        student_no TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL,
        email TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS courses (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        level TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS course_allocations (
        lecturer_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        PRIMARY KEY (lecturer_id, course_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS performance_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        semester TEXT NOT NULL,
        academic_year TEXT NOT NULL,
        quiz_average REAL NOT NULL DEFAULT 0,
        assignment_average REAL NOT NULL DEFAULT 0,
        attendance_rate REAL NOT NULL DEFAULT 0,
        participation_score REAL NOT NULL DEFAULT 0,
        overall_grade REAL NOT NULL DEFAULT 0,
        resources_accessed INTEGER NOT NULL DEFAULT 0,
        discussion_participation INTEGER NOT NULL DEFAULT 0,
        assignments_submitted INTEGER NOT NULL DEFAULT 0,
        time_spent_learning_secs INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (student_id, course_id, semester, academic_year),
        CHECK (quiz_average BETWEEN 0 AND 100),
        CHECK (assignment_average BETWEEN 0 AND 100),
        CHECK (attendance_rate BETWEEN 0 AND 100),
        CHECK (participation_score BETWEEN 0 AND 100),
        CHECK (overall_grade BETWEEN 0 AND 100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS course_rollups (
        course_id INTEGER NOT NULL,
        semester TEXT NOT NULL,
        academic_year TEXT NOT NULL,
        enrollment_count INTEGER NOT NULL,
        completion_rate REAL NOT NULL,
        dropout_rate REAL NOT NULL,
        average_grade REAL NOT NULL,
        resource_views INTEGER NOT NULL,
        discussion_posts INTEGER NOT NULL,
        assignment_submissions INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (course_id, semester, academic_year)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lecturer_rollups (
        lecturer_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        semester TEXT NOT NULL,
        academic_year TEXT NOT NULL,
        student_satisfaction REAL NOT NULL,
        course_completion_rate REAL NOT NULL,
        average_student_grade REAL NOT NULL,
        resource_utilization REAL NOT NULL,
        feedback_responses INTEGER NOT NULL,
        active_engagement REAL NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (lecturer_id, course_id, semester, academic_year)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS progress_reports (
        student_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        semester TEXT NOT NULL,
        academic_year TEXT NOT NULL,
        attendance_rate REAL NOT NULL,
        assignment_completion REAL NOT NULL,
        quiz_scores REAL NOT NULL,
        midterm_score REAL NOT NULL,
        final_score REAL NOT NULL,
        overall_grade REAL NOT NULL,
        participation_level TEXT NOT NULL,
        strengths TEXT NOT NULL,
        areas_for_improvement TEXT NOT NULL,
        recommendations TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (student_id, course_id, semester, academic_year)
    )
    "#,
];

const PERFORMANCE_COLUMNS: &str = "\
    student_id, course_id, semester, academic_year, \
    quiz_average, assignment_average, attendance_rate, participation_score, overall_grade, \
    resources_accessed, discussion_participation, assignments_submitted, \
    time_spent_learning_secs, created_at, updated_at";

const LECTURER_ROLLUP_COLUMNS: &str = "\
    lecturer_id, course_id, semester, academic_year, \
    student_satisfaction, course_completion_rate, average_student_grade, \
    resource_utilization, feedback_responses, active_engagement";

const COURSE_ROLLUP_COLUMNS: &str = "\
    course_id, semester, academic_year, enrollment_count, completion_rate, dropout_rate, \
    average_grade, resource_views, discussion_posts, assignment_submissions";

/// Optional filters shared by the list queries. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub semester: Option<String>,
    pub academic_year: Option<String>,
    pub course_id: Option<CourseId>,
    pub student_id: Option<StudentId>,
    pub lecturer_id: Option<UserId>,
    /// Restricts to these courses; an empty list matches nothing.
    pub course_ids: Option<Vec<CourseId>>,
}

impl RecordFilter {
    fn apply(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(semester) = &self.semester {
            query.push(" AND semester = ").push_bind(semester.clone());
        }
        if let Some(year) = &self.academic_year {
            query.push(" AND academic_year = ").push_bind(year.clone());
        }
        if let Some(course_id) = self.course_id {
            query.push(" AND course_id = ").push_bind(course_id);
        }
        if let Some(course_ids) = &self.course_ids {
            if course_ids.is_empty() {
                query.push(" AND 0");
            } else {
                query.push(" AND course_id IN (");
                let mut ids = query.separated(", ");
                for id in course_ids {
                    ids.push_bind(*id);
                }
                ids.push_unseparated(")");
            }
        }
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Single-connection in-memory store; every pooled connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_student(&self, student: &Student) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO students (id, student_no, full_name, email)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE
            SET student_no = excluded.student_no,
                full_name = excluded.full_name,
                email = excluded.email
            "#,
        )
        .bind(student.id)
        .bind(&student.student_no)
        .bind(&student.full_name)
        .bind(&student.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_course(&self, course: &Course) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, code, title, level)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE
            SET code = excluded.code, title = excluded.title, level = excluded.level
            "#,
        )
        .bind(course.id)
        .bind(&course.code)
        .bind(&course.title)
        .bind(&course.level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn allocate_course(
        &self,
        lecturer_id: UserId,
        course_id: CourseId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO course_allocations (lecturer_id, course_id) VALUES (?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(lecturer_id)
        .bind(course_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn student(&self, id: StudentId) -> Result<Option<Student>, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            "SELECT id, student_no, full_name, email FROM students WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn course(&self, id: CourseId) -> Result<Option<Course>, sqlx::Error> {
        sqlx::query_as::<_, Course>("SELECT id, code, title, level FROM courses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn course_allocations(&self) -> Result<Vec<(UserId, CourseId)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT lecturer_id, course_id FROM course_allocations ORDER BY lecturer_id, course_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("lecturer_id"), row.get("course_id")))
            .collect())
    }

    pub async fn lecturer_courses(&self, lecturer_id: UserId) -> Result<Vec<CourseId>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT course_id FROM course_allocations WHERE lecturer_id = ? ORDER BY course_id",
        )
        .bind(lecturer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("course_id")).collect())
    }

    pub async fn is_allocated(
        &self,
        lecturer_id: UserId,
        course_id: CourseId,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM course_allocations WHERE lecturer_id = ? AND course_id = ?",
        )
        .bind(lecturer_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    /// Insert or overwrite the record for its (student, course, semester, year) key.
    /// `created_at` of an existing row is kept.
    pub async fn upsert_performance(&self, record: &PerformanceRecord) -> Result<(), sqlx::Error> {
        upsert_performance_on(&self.pool, record).await
    }

    /// Upserts a whole score sheet in one transaction: either every record is
    /// stored or none is.
    pub async fn upsert_performances(&self, records: &[PerformanceRecord]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            upsert_performance_on(&mut *tx, record).await?;
        }
        tx.commit().await
    }

    pub async fn performance(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        period: &Period,
    ) -> Result<Option<PerformanceRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {PERFORMANCE_COLUMNS} FROM performance_records \
             WHERE student_id = ? AND course_id = ? AND semester = ? AND academic_year = ?"
        );
        sqlx::query_as::<_, PerformanceRecord>(&query)
            .bind(student_id)
            .bind(course_id)
            .bind(&period.semester)
            .bind(&period.academic_year)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn course_performances(
        &self,
        course_id: CourseId,
        period: &Period,
    ) -> Result<Vec<PerformanceRecord>, sqlx::Error> {
        self.performances(&RecordFilter {
            course_id: Some(course_id),
            semester: Some(period.semester.clone()),
            academic_year: Some(period.academic_year.clone()),
            ..Default::default()
        })
        .await
    }

    /// Every record of a student in a course, newest first.
    pub async fn student_course_history(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        limit: Option<i64>,
    ) -> Result<Vec<PerformanceRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {PERFORMANCE_COLUMNS} FROM performance_records \
             WHERE student_id = ? AND course_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        sqlx::query_as::<_, PerformanceRecord>(&query)
            .bind(student_id)
            .bind(course_id)
            .bind(limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await
    }

    pub async fn performances(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<PerformanceRecord>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PERFORMANCE_COLUMNS} FROM performance_records WHERE 1 = 1"
        ));
        filter.apply(&mut query);
        if let Some(student_id) = filter.student_id {
            query.push(" AND student_id = ").push_bind(student_id);
        }
        query.push(" ORDER BY created_at DESC, id DESC");

        query
            .build_query_as::<PerformanceRecord>()
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert_course_rollup(&self, rollup: &CourseRollup) -> Result<(), sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO course_rollups ({COURSE_ROLLUP_COLUMNS}, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (course_id, semester, academic_year) DO UPDATE
            SET enrollment_count = excluded.enrollment_count,
                completion_rate = excluded.completion_rate,
                dropout_rate = excluded.dropout_rate,
                average_grade = excluded.average_grade,
                resource_views = excluded.resource_views,
                discussion_posts = excluded.discussion_posts,
                assignment_submissions = excluded.assignment_submissions,
                updated_at = excluded.updated_at
            "#
        );
        sqlx::query(&query)
            .bind(rollup.course_id)
            .bind(&rollup.semester)
            .bind(&rollup.academic_year)
            .bind(rollup.enrollment_count)
            .bind(rollup.completion_rate)
            .bind(rollup.dropout_rate)
            .bind(rollup.average_grade)
            .bind(rollup.resource_views)
            .bind(rollup.discussion_posts)
            .bind(rollup.assignment_submissions)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn course_rollups(&self, filter: &RecordFilter) -> Result<Vec<CourseRollup>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COURSE_ROLLUP_COLUMNS} FROM course_rollups WHERE 1 = 1"
        ));
        filter.apply(&mut query);
        query.push(" ORDER BY updated_at DESC, course_id");

        query
            .build_query_as::<CourseRollup>()
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert_lecturer_rollup(&self, rollup: &LecturerRollup) -> Result<(), sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO lecturer_rollups ({LECTURER_ROLLUP_COLUMNS}, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (lecturer_id, course_id, semester, academic_year) DO UPDATE
            SET student_satisfaction = excluded.student_satisfaction,
                course_completion_rate = excluded.course_completion_rate,
                average_student_grade = excluded.average_student_grade,
                resource_utilization = excluded.resource_utilization,
                feedback_responses = excluded.feedback_responses,
                active_engagement = excluded.active_engagement,
                updated_at = excluded.updated_at
            "#
        );
        sqlx::query(&query)
            .bind(rollup.lecturer_id)
            .bind(rollup.course_id)
            .bind(&rollup.semester)
            .bind(&rollup.academic_year)
            .bind(rollup.student_satisfaction)
            .bind(rollup.course_completion_rate)
            .bind(rollup.average_student_grade)
            .bind(rollup.resource_utilization)
            .bind(rollup.feedback_responses)
            .bind(rollup.active_engagement)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn lecturer_rollups(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<LecturerRollup>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {LECTURER_ROLLUP_COLUMNS} FROM lecturer_rollups WHERE 1 = 1"
        ));
        filter.apply(&mut query);
        if let Some(lecturer_id) = filter.lecturer_id {
            query.push(" AND lecturer_id = ").push_bind(lecturer_id);
        }
        query.push(" ORDER BY updated_at DESC, lecturer_id, course_id");

        query
            .build_query_as::<LecturerRollup>()
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert_progress_report(&self, report: &ProgressReport) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO progress_reports (
                student_id, course_id, semester, academic_year,
                attendance_rate, assignment_completion, quiz_scores, midterm_score, final_score,
                overall_grade, participation_level, strengths, areas_for_improvement,
                recommendations, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (student_id, course_id, semester, academic_year) DO UPDATE
            SET attendance_rate = excluded.attendance_rate,
                assignment_completion = excluded.assignment_completion,
                quiz_scores = excluded.quiz_scores,
                midterm_score = excluded.midterm_score,
                final_score = excluded.final_score,
                overall_grade = excluded.overall_grade,
                participation_level = excluded.participation_level,
                strengths = excluded.strengths,
                areas_for_improvement = excluded.areas_for_improvement,
                recommendations = excluded.recommendations,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(report.student_id)
        .bind(report.course_id)
        .bind(&report.semester)
        .bind(&report.academic_year)
        .bind(report.attendance_rate)
        .bind(report.assignment_completion)
        .bind(report.quiz_scores)
        .bind(report.midterm_score)
        .bind(report.final_score)
        .bind(report.overall_grade)
        .bind(report.participation_level.as_str())
        .bind(report.strengths.join(", "))
        .bind(report.areas_for_improvement.join(", "))
        .bind(&report.recommendations)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn progress_report(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        period: &Period,
    ) -> Result<Option<ProgressReport>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT student_id, course_id, semester, academic_year,
                   attendance_rate, assignment_completion, quiz_scores, midterm_score,
                   final_score, overall_grade, participation_level, strengths,
                   areas_for_improvement, recommendations
            FROM progress_reports
            WHERE student_id = ? AND course_id = ? AND semester = ? AND academic_year = ?
            "#,
        )
        .bind(student_id)
        .bind(course_id)
        .bind(&period.semester)
        .bind(&period.academic_year)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ProgressReport {
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            semester: row.get("semester"),
            academic_year: row.get("academic_year"),
            attendance_rate: row.get("attendance_rate"),
            assignment_completion: row.get("assignment_completion"),
            quiz_scores: row.get("quiz_scores"),
            midterm_score: row.get("midterm_score"),
            final_score: row.get("final_score"),
            overall_grade: row.get("overall_grade"),
            participation_level: ParticipationLevel::parse(row.get("participation_level")),
            strengths: split_list(row.get("strengths")),
            areas_for_improvement: split_list(row.get("areas_for_improvement")),
            recommendations: row.get("recommendations"),
        }))
    }
}

async fn upsert_performance_on<'e, E>(executor: E, record: &PerformanceRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        r#"
        INSERT INTO performance_records ({PERFORMANCE_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (student_id, course_id, semester, academic_year) DO UPDATE
        SET quiz_average = excluded.quiz_average,
            assignment_average = excluded.assignment_average,
            attendance_rate = excluded.attendance_rate,
            participation_score = excluded.participation_score,
            overall_grade = excluded.overall_grade,
            resources_accessed = excluded.resources_accessed,
            discussion_participation = excluded.discussion_participation,
            assignments_submitted = excluded.assignments_submitted,
            time_spent_learning_secs = excluded.time_spent_learning_secs,
            updated_at = excluded.updated_at
        "#
    );

    sqlx::query(&query)
        .bind(record.student_id)
        .bind(record.course_id)
        .bind(&record.semester)
        .bind(&record.academic_year)
        .bind(record.quiz_average)
        .bind(record.assignment_average)
        .bind(record.attendance_rate)
        .bind(record.participation_score)
        .bind(record.overall_grade)
        .bind(record.resources_accessed)
        .bind(record.discussion_participation)
        .bind(record.assignments_submitted)
        .bind(record.time_spent_learning_secs)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(executor)
        .await?;
    Ok(())
}

fn split_list(joined: String) -> Vec<String> {
    joined
        .split(", ")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
