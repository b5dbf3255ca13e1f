use std::io::Read;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{AnalyticsError, Result};
use crate::insights::{Insight, InsightGenerator};
use crate::metrics::{build_progress_report, grade_for, performance_from_scores, ProgressInputs, ProgressReport, ScoreEntry};
use crate::models::{CourseId, CourseRollup, LecturerRollup, Period, PerformanceRecord, StudentId, UserId};
use crate::patterns::{LearningPattern, PatternAnalyzer};
use crate::render::{DashboardView, PdfRenderer, RenderedSheet, ResultRow, ResultSheet, TrendChart};
use crate::rollup::{
    course_rollup, lecturer_rollup, summarize_courses, summarize_lecturers, summarize_performance,
    LecturerSummary, PerformanceSummary,
};
use crate::store::{Database, RecordFilter};

/// Prior records considered next to the current one when predicting a trend.
pub const INSIGHT_HISTORY: i64 = 5;

const NO_RECOMMENDATION: &str = "Keep up the current study habits";

#[derive(Debug, Serialize, Clone)]
pub struct ScoreOutcome {
    pub saved: usize,
    pub lecturer_rollup: Option<LecturerRollup>,
}

#[derive(Debug, Serialize, Clone)]
pub struct StudentInsight {
    pub record: PerformanceRecord,
    /// Overall grades of the prior records, oldest first.
    pub history: Vec<f64>,
    pub insight: Insight,
}

#[derive(Debug, Serialize, Clone)]
pub struct PerformanceOverview {
    pub records: Vec<PerformanceRecord>,
    pub summary: PerformanceSummary,
}

#[derive(Debug, Serialize, Clone)]
pub struct LecturerOverview {
    pub rollups: Vec<LecturerRollup>,
    pub summary: LecturerSummary,
}

/// Wires the store to the aggregation, insight and rendering layers. Holds no
/// state of its own beyond configuration.
pub struct AnalyticsService {
    db: Database,
    insights: InsightGenerator,
    patterns: PatternAnalyzer,
    pdf: PdfRenderer,
    media_root: PathBuf,
}

impl AnalyticsService {
    pub fn new(db: Database, pdf: PdfRenderer, media_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            insights: InsightGenerator::new(),
            patterns: PatternAnalyzer::new(),
            pdf,
            media_root: media_root.into(),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Stores a lecturer's score sheet in one transaction, then refreshes that
    /// lecturer's rollup for the course once for the whole batch.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn record_scores(
        &self,
        lecturer_id: UserId,
        course_id: CourseId,
        period: &Period,
        entries: &[ScoreEntry],
    ) -> Result<ScoreOutcome> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut record = performance_from_scores(entry, course_id, period, now);
            if let Some(existing) = self.db.performance(entry.student_id, course_id, period).await? {
                record.created_at = existing.created_at;
                record.time_spent_learning_secs = existing.time_spent_learning_secs;
                if entry.resources_accessed.is_none() {
                    record.resources_accessed = existing.resources_accessed;
                }
                if entry.discussion_participation.is_none() {
                    record.discussion_participation = existing.discussion_participation;
                }
                if entry.assignments_submitted.is_none() {
                    record.assignments_submitted = existing.assignments_submitted;
                }
            }
            records.push(record);
        }
        self.db.upsert_performances(&records).await?;
        info!(saved = records.len(), "score sheet stored");

        let lecturer_rollup = if entries.is_empty() {
            None
        } else {
            self.refresh_lecturer_rollup(lecturer_id, course_id, period).await?
        };

        Ok(ScoreOutcome {
            saved: entries.len(),
            lecturer_rollup,
        })
    }

    /// Reads a score sheet from CSV (`student_id, quiz, assignment, attendance, total`).
    pub async fn import_scores_csv<R: Read>(
        &self,
        lecturer_id: UserId,
        course_id: CourseId,
        period: &Period,
        source: R,
    ) -> Result<ScoreOutcome> {
        let entries = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source)
            .deserialize::<ScoreEntry>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(rows = entries.len(), "parsed score csv");
        self.record_scores(lecturer_id, course_id, period, &entries).await
    }

    #[instrument(skip(self))]
    pub async fn refresh_lecturer_rollup(
        &self,
        lecturer_id: UserId,
        course_id: CourseId,
        period: &Period,
    ) -> Result<Option<LecturerRollup>> {
        let records = self.db.course_performances(course_id, period).await?;
        let Some(rollup) = lecturer_rollup(lecturer_id, course_id, period, &records) else {
            debug!("no performance records, lecturer rollup skipped");
            return Ok(None);
        };
        self.db.upsert_lecturer_rollup(&rollup).await?;
        info!(students = records.len(), "lecturer rollup refreshed");
        Ok(Some(rollup))
    }

    /// Recomputes the rollup of every allocated (lecturer, course) pair.
    #[instrument(skip(self))]
    pub async fn refresh_all_lecturer_rollups(&self, period: &Period) -> Result<Vec<LecturerRollup>> {
        let mut refreshed = Vec::new();
        for (lecturer_id, course_id) in self.db.course_allocations().await? {
            if let Some(rollup) = self.refresh_lecturer_rollup(lecturer_id, course_id, period).await? {
                refreshed.push(rollup);
            }
        }
        info!(refreshed = refreshed.len(), "lecturer rollups refreshed");
        Ok(refreshed)
    }

    #[instrument(skip(self))]
    pub async fn refresh_course_rollup(
        &self,
        course_id: CourseId,
        period: &Period,
    ) -> Result<Option<CourseRollup>> {
        let records = self.db.course_performances(course_id, period).await?;
        let Some(rollup) = course_rollup(course_id, period, &records) else {
            debug!("no performance records, course rollup skipped");
            return Ok(None);
        };
        self.db.upsert_course_rollup(&rollup).await?;
        info!(enrollment = rollup.enrollment_count, "course rollup refreshed");
        Ok(Some(rollup))
    }

    /// Insight over the student's latest record in a course and up to
    /// [`INSIGHT_HISTORY`] records before it.
    #[instrument(skip(self))]
    pub async fn student_insight(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<StudentInsight>> {
        let mut records = self
            .db
            .student_course_history(student_id, course_id, Some(INSIGHT_HISTORY + 1))
            .await?;
        if records.is_empty() {
            return Ok(None);
        }

        let record = records.remove(0);
        records.reverse();
        let insight = self.insights.generate_report(&record, &records);
        debug!(
            style = %insight.learning_style,
            trend = %insight.performance_trend,
            recommendations = insight.recommendations.len(),
            "insight generated"
        );

        Ok(Some(StudentInsight {
            history: records.iter().map(|r| r.overall_grade).collect(),
            record,
            insight,
        }))
    }

    #[instrument(skip(self))]
    pub async fn course_patterns(&self, course_id: CourseId, period: &Period) -> Result<Vec<LearningPattern>> {
        let records = self.db.course_performances(course_id, period).await?;
        let patterns = self.patterns.discover(&records)?;
        info!(students = records.len(), patterns = patterns.len(), "learning patterns discovered");
        Ok(patterns)
    }

    #[instrument(skip(self, inputs))]
    pub async fn generate_progress_report(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        period: &Period,
        inputs: &ProgressInputs,
    ) -> Result<ProgressReport> {
        if inputs.attended_classes > inputs.total_classes {
            return Err(AnalyticsError::InvalidInput(
                "attended classes exceed total classes".to_string(),
            ));
        }
        if inputs.completed_assignments > inputs.total_assignments {
            return Err(AnalyticsError::InvalidInput(
                "completed assignments exceed total assignments".to_string(),
            ));
        }

        let report = build_progress_report(student_id, course_id, period, inputs);
        self.db.upsert_progress_report(&report).await?;
        info!(overall = report.overall_grade, level = report.participation_level.as_str(), "progress report saved");
        Ok(report)
    }

    pub async fn performance_overview(&self, filter: &RecordFilter) -> Result<PerformanceOverview> {
        let records = self.db.performances(filter).await?;
        let summary = summarize_performance(&records);
        Ok(PerformanceOverview { records, summary })
    }

    pub async fn lecturer_overview(&self, filter: &RecordFilter) -> Result<LecturerOverview> {
        let rollups = self.db.lecturer_rollups(filter).await?;
        let summary = summarize_lecturers(&rollups);
        Ok(LecturerOverview { rollups, summary })
    }

    /// Dashboard over stored rollups, optionally narrowed to one period.
    pub async fn dashboard(&self, period: Option<&Period>, flash: Option<String>) -> Result<DashboardView> {
        let filter = RecordFilter {
            semester: period.map(|p| p.semester.clone()),
            academic_year: period.map(|p| p.academic_year.clone()),
            ..Default::default()
        };

        let records = self.db.performances(&filter).await?;
        let lecturer_rows = self.db.lecturer_rollups(&filter).await?;
        let course_rollups = self.db.course_rollups(&filter).await?;

        Ok(DashboardView {
            period: period.map(|p| p.to_string()),
            flash,
            performance: summarize_performance(&records),
            lecturers: summarize_lecturers(&lecturer_rows),
            courses: summarize_courses(&course_rollups),
            course_rows: course_rollups.into_iter().map(Into::into).collect(),
            lecturer_rows,
        })
    }

    /// Builds and writes the result sheet PDF for one course and period.
    #[instrument(skip(self, lecturer_name))]
    pub async fn result_sheet(
        &self,
        lecturer_id: UserId,
        lecturer_name: Option<&str>,
        course_id: CourseId,
        period: &Period,
    ) -> Result<RenderedSheet> {
        let course = self
            .db
            .course(course_id)
            .await?
            .ok_or_else(|| AnalyticsError::NotFound(format!("course {course_id}")))?;

        let mut records = self.db.course_performances(course_id, period).await?;
        records.sort_by_key(|r| r.student_id);

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(self.result_row(record).await?);
        }

        let sheet = ResultSheet {
            period: period.clone(),
            course: course.to_string(),
            lecturer: lecturer_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("Lecturer #{lecturer_id}")),
            level: course.level.clone(),
            rows,
        };
        if sheet.rows.is_empty() {
            warn!(course = %course, "result sheet has no students");
        }

        Ok(self.pdf.write(&sheet, &self.media_root, &course.code)?)
    }

    async fn result_row(&self, record: &PerformanceRecord) -> Result<ResultRow> {
        let (student_no, full_name) = match self.db.student(record.student_id).await? {
            Some(student) => (student.student_no, student.full_name),
            None => (record.student_id.to_string(), format!("Student {}", record.student_id)),
        };

        // Everything for this course, oldest first, up to and including `record`.
        let mut history = self
            .db
            .student_course_history(record.student_id, record.course_id, None)
            .await?;
        history.reverse();
        if let Some(position) = history.iter().position(|r| r.in_period(&record.period())) {
            history.truncate(position + 1);
        }
        let prior_start = history.len().saturating_sub(INSIGHT_HISTORY as usize + 1);
        let prior = &history[prior_start..history.len().saturating_sub(1)];

        let insight = self.insights.generate_report(record, prior);
        let grades: Vec<f64> = history.iter().map(|r| r.overall_grade).collect();

        Ok(ResultRow {
            student_no,
            full_name,
            total: record.overall_grade,
            grade: grade_for(record.overall_grade),
            learning_style: insight.learning_style.to_string(),
            trend: insight.performance_trend.to_string(),
            recommendation: insight
                .recommendations
                .first()
                .map(|r| r.text.clone())
                .unwrap_or_else(|| NO_RECOMMENDATION.to_string()),
            chart: TrendChart::new(&grades),
        })
    }
}
