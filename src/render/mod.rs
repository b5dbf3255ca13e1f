pub mod chart;
pub mod pdf;

use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use serde::Serialize;

use crate::error::RenderError;
use crate::models::{CourseRollup, LecturerRollup};
use crate::rollup::{CourseProgressSummary, LecturerSummary, PerformanceSummary};

pub use chart::TrendChart;
pub use pdf::{PdfRenderer, RenderedSheet, ResultRow, ResultSheet};

const DASHBOARD_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>LMS Analytics Dashboard</title>
    <style>
        body { font-family: Arial, sans-serif; max-width: 1000px; margin: 40px auto; padding: 20px; }
        .container { background: #f5f5f5; padding: 25px; border-radius: 10px; }
        .flash { background: #fff3cd; color: #856404; border: 1px solid #ffeaa7; padding: 12px; border-radius: 5px; margin-bottom: 15px; }
        .cards { display: flex; gap: 15px; flex-wrap: wrap; }
        .card { background: white; padding: 15px; border-radius: 8px; flex: 1; min-width: 200px; }
        .card h3 { margin-top: 0; }
        table { width: 100%; border-collapse: collapse; margin: 15px 0; background: white; }
        th, td { padding: 10px; text-align: left; border-bottom: 1px solid #ddd; }
        th { background: #f8f9fa; }
    </style>
</head>
<body>
    <div class="container">
        <h1>LMS Analytics Dashboard</h1>
        {{#if flash}}<div class="flash">{{flash}}</div>{{/if}}
        {{#if period}}<p>Period: {{period}}</p>{{/if}}

        <div class="cards">
            <div class="card">
                <h3>Student performance</h3>
                <p>Records: {{performance.total_records}}</p>
                <p>Quiz average: {{fixed1 performance.avg_quiz}}%</p>
                <p>Assignment average: {{fixed1 performance.avg_assignment}}%</p>
                <p>Attendance: {{fixed1 performance.avg_attendance}}%</p>
                <p>Overall grade: {{fixed1 performance.avg_overall}}%</p>
            </div>
            <div class="card">
                <h3>Lecturers</h3>
                <p>Rollups: {{lecturers.total_rollups}}</p>
                <p>Satisfaction: {{fixed1 lecturers.avg_satisfaction}}%</p>
                <p>Completion: {{fixed1 lecturers.avg_completion}}%</p>
                <p>Resource utilisation: {{fixed1 lecturers.avg_resource}}%</p>
            </div>
            <div class="card">
                <h3>Courses</h3>
                <p>Enrollments: {{courses.total_enrollments}}</p>
                <p>Completion rate: {{fixed1 courses.avg_completion_rate}}%</p>
                <p>Dropout rate: {{fixed1 courses.avg_dropout_rate}}%</p>
                <p>Resource usage: {{fixed1 courses.avg_resource_usage}}%</p>
            </div>
        </div>

        <h2>Course progress</h2>
        {{#if course_rows}}
        <table>
            <tr><th>Course</th><th>Period</th><th>Enrolled</th><th>Completion</th><th>Dropout</th><th>Average grade</th><th>Resource usage</th></tr>
            {{#each course_rows}}
            <tr><td>{{course_id}}</td><td>{{semester}} {{academic_year}}</td><td>{{enrollment_count}}</td><td>{{fixed1 completion_rate}}%</td><td>{{fixed1 dropout_rate}}%</td><td>{{fixed1 average_grade}}</td><td>{{fixed1 resource_usage}}%</td></tr>
            {{/each}}
        </table>
        {{else}}
        <p>No course rollups yet.</p>
        {{/if}}

        <h2>Lecturer performance</h2>
        {{#if lecturer_rows}}
        <table>
            <tr><th>Lecturer</th><th>Course</th><th>Satisfaction</th><th>Completion</th><th>Average grade</th><th>Resources</th><th>Feedback</th></tr>
            {{#each lecturer_rows}}
            <tr><td>{{lecturer_id}}</td><td>{{course_id}}</td><td>{{fixed1 student_satisfaction}}%</td><td>{{fixed1 course_completion_rate}}%</td><td>{{fixed1 average_student_grade}}</td><td>{{fixed1 resource_utilization}}%</td><td>{{feedback_responses}}</td></tr>
            {{/each}}
        </table>
        {{else}}
        <p>No lecturer rollups yet.</p>
        {{/if}}
    </div>
</body>
</html>
"#;

#[derive(Debug, Serialize, Clone)]
pub struct CourseRow {
    #[serde(flatten)]
    pub rollup: CourseRollup,
    pub resource_usage: f64,
}

impl From<CourseRollup> for CourseRow {
    fn from(rollup: CourseRollup) -> Self {
        let resource_usage = rollup.resource_usage();
        CourseRow {
            rollup,
            resource_usage,
        }
    }
}

/// Everything the dashboard template reads.
#[derive(Debug, Serialize, Clone, Default)]
pub struct DashboardView {
    pub period: Option<String>,
    pub flash: Option<String>,
    pub performance: PerformanceSummary,
    pub lecturers: LecturerSummary,
    pub courses: CourseProgressSummary,
    pub course_rows: Vec<CourseRow>,
    pub lecturer_rows: Vec<LecturerRollup>,
}

pub struct ReportRenderer {
    handlebars: Handlebars<'static>,
}

impl ReportRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_helper("fixed1", Box::new(fixed1_helper));
        handlebars.register_template_string("dashboard", DASHBOARD_TEMPLATE)?;
        Ok(Self { handlebars })
    }

    pub fn dashboard(&self, view: &DashboardView) -> Result<String, RenderError> {
        Ok(self.handlebars.render("dashboard", view)?)
    }
}

/// Formats a number with one decimal place; non-numbers render as-is.
fn fixed1_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|p| p.value());
    match value.and_then(|v| v.as_f64()) {
        Some(number) => out.write(&format!("{number:.1}"))?,
        None => {
            if let Some(v) = value {
                out.write(&v.to_string())?;
            }
        }
    }
    Ok(())
}
