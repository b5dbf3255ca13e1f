use std::future::{ready, Ready};
use std::time::Instant;

use actix_web::body::MessageBody;
use actix_web::cookie::Cookie;
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderMap};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AnalyticsError, Result};
use crate::mailer::{confirmation_email, MailQueue};
use crate::metrics::{ProgressInputs, ScoreEntry};
use crate::models::{CourseId, Period, Role, StudentId, UserId};
use crate::monitor::SystemMonitor;
use crate::render::ReportRenderer;
use crate::service::AnalyticsService;
use crate::store::RecordFilter;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const FLASH_COOKIE: &str = "flash";

impl ResponseError for AnalyticsError {
    fn status_code(&self) -> StatusCode {
        match self {
            AnalyticsError::NotFound(_) => StatusCode::NOT_FOUND,
            AnalyticsError::InvalidInput(_) | AnalyticsError::Csv(_) => StatusCode::BAD_REQUEST,
            AnalyticsError::Forbidden(_) => StatusCode::SEE_OTHER,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Permission failures bounce back to the dashboard with a flash message.
    fn error_response(&self) -> HttpResponse {
        match self {
            AnalyticsError::Forbidden(message) => HttpResponse::SeeOther()
                .insert_header((header::LOCATION, "/dashboard"))
                .cookie(Cookie::build(FLASH_COOKIE, message.clone()).path("/").finish())
                .finish(),
            _ => HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() })),
        }
    }
}

/// Caller identity as forwarded by the authenticating proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: UserId,
    pub role: Role,
}

impl Viewer {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let id = header(USER_ID_HEADER)
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| AnalyticsError::Forbidden("Please sign in to continue".to_string()))?;
        let role = header(USER_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| AnalyticsError::Forbidden("Please sign in to continue".to_string()))?;

        Ok(Viewer { id, role })
    }

    pub fn require_staff(&self) -> Result<()> {
        match self.role {
            Role::Staff => Ok(()),
            _ => Err(AnalyticsError::Forbidden(
                "Only staff can perform that action".to_string(),
            )),
        }
    }

    /// Staff see every course, lecturers only the courses allocated to them.
    pub async fn require_course(&self, service: &AnalyticsService, course_id: CourseId) -> Result<()> {
        match self.role {
            Role::Staff => Ok(()),
            Role::Lecturer if service.db().is_allocated(self.id, course_id).await? => Ok(()),
            _ => Err(AnalyticsError::Forbidden(
                "You are not allowed to view reports for that course".to_string(),
            )),
        }
    }

    /// Students see their own records; staff and the course's lecturers see everyone's.
    pub async fn require_student(
        &self,
        service: &AnalyticsService,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<()> {
        match self.role {
            Role::Student if self.id == student_id => Ok(()),
            Role::Student => Err(AnalyticsError::Forbidden(
                "You can only view your own performance".to_string(),
            )),
            _ => self.require_course(service, course_id).await,
        }
    }
}

impl FromRequest for Viewer {
    type Error = AnalyticsError;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Viewer::from_headers(req.headers()))
    }
}

/// Times every request into the shared [`SystemMonitor`].
pub async fn track_requests(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> std::result::Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let monitor = req.app_data::<web::Data<SystemMonitor>>().cloned();
    if let Some(monitor) = &monitor {
        monitor.request_started();
    }
    let started = Instant::now();

    let response = next.call(req).await;

    if let Some(monitor) = monitor {
        let status = match &response {
            Ok(res) => res.status(),
            Err(err) => err.as_response_error().status_code(),
        };
        monitor.request_finished(started.elapsed(), status.as_u16());
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub semester: String,
    pub academic_year: String,
}

impl From<PeriodQuery> for Period {
    fn from(q: PeriodQuery) -> Self {
        Period::new(q.semester, q.academic_year)
    }
}

#[derive(Debug, Deserialize)]
pub struct OptionalPeriodQuery {
    pub semester: Option<String>,
    pub academic_year: Option<String>,
}

impl OptionalPeriodQuery {
    fn period(&self) -> Option<Period> {
        match (&self.semester, &self.academic_year) {
            (Some(semester), Some(year)) => Some(Period::new(semester.clone(), year.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub semester: Option<String>,
    pub academic_year: Option<String>,
    pub course: Option<CourseId>,
}

#[derive(Debug, Deserialize)]
pub struct LecturerRollupQuery {
    pub semester: Option<String>,
    pub academic_year: Option<String>,
    pub course: Option<CourseId>,
    pub lecturer: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ResultSheetQuery {
    pub semester: String,
    pub session: String,
}

#[derive(Debug, Deserialize)]
pub struct ScoreSheet {
    pub semester: String,
    pub academic_year: String,
    pub entries: Vec<ScoreEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub semester: String,
    pub academic_year: String,
    #[serde(flatten)]
    pub inputs: ProgressInputs,
}

#[derive(Debug, Deserialize)]
pub struct AccountNotice {
    pub role: Role,
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Login,
    Resource,
}

#[derive(Debug, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
}

fn no_data() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "no data" }))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "lms-analytics",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn dashboard(
    req: HttpRequest,
    query: web::Query<OptionalPeriodQuery>,
    service: web::Data<AnalyticsService>,
    renderer: web::Data<ReportRenderer>,
) -> Result<HttpResponse> {
    let flash = req.cookie(FLASH_COOKIE).map(|c| c.value().to_string());
    let period = query.period();
    let view = service.dashboard(period.as_ref(), flash.clone()).await?;
    let html = renderer.dashboard(&view)?;

    let mut response = HttpResponse::Ok();
    response.content_type("text/html; charset=utf-8");
    if flash.is_some() {
        let mut removal = Cookie::build(FLASH_COOKIE, "").path("/").finish();
        removal.make_removal();
        response.cookie(removal);
    }
    Ok(response.body(html))
}

async fn performance(
    viewer: Viewer,
    query: web::Query<PerformanceQuery>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let mut filter = RecordFilter {
        semester: query.semester,
        academic_year: query.academic_year,
        course_id: query.course,
        ..Default::default()
    };
    match viewer.role {
        Role::Student => filter.student_id = Some(viewer.id),
        Role::Lecturer => filter.course_ids = Some(service.db().lecturer_courses(viewer.id).await?),
        Role::Staff => {}
    }

    let overview = service.performance_overview(&filter).await?;
    Ok(HttpResponse::Ok().json(overview))
}

async fn record_scores(
    viewer: Viewer,
    path: web::Path<CourseId>,
    sheet: web::Json<ScoreSheet>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let course_id = path.into_inner();
    if viewer.role != Role::Lecturer {
        return Err(AnalyticsError::Forbidden(
            "Only lecturers can enter scores".to_string(),
        ));
    }
    viewer.require_course(&service, course_id).await?;

    let sheet = sheet.into_inner();
    let period = Period::new(sheet.semester, sheet.academic_year);
    let outcome = service
        .record_scores(viewer.id, course_id, &period, &sheet.entries)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn course_rollup(
    viewer: Viewer,
    path: web::Path<CourseId>,
    query: web::Query<PeriodQuery>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let course_id = path.into_inner();
    viewer.require_course(&service, course_id).await?;

    let period: Period = query.into_inner().into();
    match service.refresh_course_rollup(course_id, &period).await? {
        Some(rollup) => {
            let resource_usage = rollup.resource_usage();
            Ok(HttpResponse::Ok().json(json!({
                "rollup": rollup,
                "resource_usage": resource_usage,
            })))
        }
        None => Ok(no_data()),
    }
}

async fn lecturer_rollups(
    viewer: Viewer,
    query: web::Query<LecturerRollupQuery>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let lecturer_id = match viewer.role {
        Role::Staff => query.lecturer,
        Role::Lecturer => Some(viewer.id),
        Role::Student => {
            return Err(AnalyticsError::Forbidden(
                "You are not allowed to view lecturer reports".to_string(),
            ))
        }
    };
    let filter = RecordFilter {
        semester: query.semester,
        academic_year: query.academic_year,
        course_id: query.course,
        lecturer_id,
        ..Default::default()
    };

    let overview = service.lecturer_overview(&filter).await?;
    Ok(HttpResponse::Ok().json(overview))
}

async fn refresh_lecturer_rollups(
    viewer: Viewer,
    period: web::Json<PeriodQuery>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    viewer.require_staff()?;
    let period: Period = period.into_inner().into();
    let refreshed = service.refresh_all_lecturer_rollups(&period).await?;
    info!(by = viewer.id, refreshed = refreshed.len(), "manual lecturer rollup refresh");
    Ok(HttpResponse::Ok().json(json!({
        "refreshed": refreshed.len(),
        "rollups": refreshed,
    })))
}

async fn student_insight(
    viewer: Viewer,
    path: web::Path<(StudentId, CourseId)>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let (student_id, course_id) = path.into_inner();
    viewer.require_student(&service, student_id, course_id).await?;

    match service.student_insight(student_id, course_id).await? {
        Some(insight) => Ok(HttpResponse::Ok().json(insight)),
        None => Ok(no_data()),
    }
}

async fn course_patterns(
    viewer: Viewer,
    path: web::Path<CourseId>,
    query: web::Query<PeriodQuery>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let course_id = path.into_inner();
    viewer.require_course(&service, course_id).await?;

    let period: Period = query.into_inner().into();
    let patterns = service.course_patterns(course_id, &period).await?;
    Ok(HttpResponse::Ok().json(patterns))
}

async fn progress_report(
    viewer: Viewer,
    path: web::Path<(StudentId, CourseId)>,
    body: web::Json<ProgressRequest>,
    service: web::Data<AnalyticsService>,
) -> Result<HttpResponse> {
    let (student_id, course_id) = path.into_inner();
    if viewer.role == Role::Student {
        return Err(AnalyticsError::Forbidden(
            "Only staff and lecturers can generate progress reports".to_string(),
        ));
    }
    viewer.require_course(&service, course_id).await?;

    let body = body.into_inner();
    let period = Period::new(body.semester, body.academic_year);
    let report = service
        .generate_progress_report(student_id, course_id, &period, &body.inputs)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn result_sheet(
    viewer: Viewer,
    path: web::Path<CourseId>,
    query: web::Query<ResultSheetQuery>,
    service: web::Data<AnalyticsService>,
    monitor: web::Data<SystemMonitor>,
) -> Result<HttpResponse> {
    let course_id = path.into_inner();
    viewer.require_course(&service, course_id).await?;

    let query = query.into_inner();
    let period = Period::new(query.semester, query.session);
    let sheet = service.result_sheet(viewer.id, None, course_id, &period).await?;
    monitor.record_resource_access();

    let file_name = sheet
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resultSheet.pdf".to_string());
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{file_name}\""),
        ))
        .body(sheet.bytes))
}

async fn notify_account(
    viewer: Viewer,
    notice: web::Json<AccountNotice>,
    queue: web::Data<MailQueue>,
    monitor: web::Data<SystemMonitor>,
) -> Result<HttpResponse> {
    viewer.require_staff()?;
    let notice = notice.into_inner();
    let email = confirmation_email(
        notice.role,
        &notice.name,
        &notice.email,
        &notice.username,
        &notice.password,
    )?;

    monitor.record_new_user();
    if let Err(e) = queue.enqueue(email) {
        // The account exists either way; a lost email is not the caller's problem.
        warn!(to = %notice.email, "confirmation email not queued: {e}");
    }
    Ok(HttpResponse::Accepted().json(json!({ "queued": true })))
}

async fn record_activity(
    _viewer: Viewer,
    activity: web::Json<Activity>,
    monitor: web::Data<SystemMonitor>,
) -> HttpResponse {
    match activity.kind {
        ActivityKind::Login => monitor.record_login(),
        ActivityKind::Resource => monitor.record_resource_access(),
    }
    HttpResponse::NoContent().finish()
}

async fn system_metrics(
    viewer: Viewer,
    monitor: web::Data<SystemMonitor>,
    queue: Option<web::Data<MailQueue>>,
) -> Result<HttpResponse> {
    viewer.require_staff()?;
    Ok(HttpResponse::Ok().json(json!({
        "system": monitor.snapshot(),
        "mail": queue.map(|q| q.stats()),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(dashboard))
        .route("/health", web::get().to(health_check))
        .route("/dashboard", web::get().to(dashboard))
        .route("/api/performance", web::get().to(performance))
        .route("/api/courses/{id}/scores", web::post().to(record_scores))
        .route("/api/courses/{id}/rollup", web::get().to(course_rollup))
        .route("/api/courses/{id}/patterns", web::get().to(course_patterns))
        .route("/api/lecturers/rollups", web::get().to(lecturer_rollups))
        .route(
            "/api/lecturers/rollups/refresh",
            web::post().to(refresh_lecturer_rollups),
        )
        .route(
            "/api/students/{sid}/courses/{cid}/insights",
            web::get().to(student_insight),
        )
        .route(
            "/api/students/{sid}/courses/{cid}/progress-report",
            web::post().to(progress_report),
        )
        .route("/courses/{id}/result-sheet", web::get().to(result_sheet))
        .route("/api/accounts/notify", web::post().to(notify_account))
        .route("/api/activity", web::post().to(record_activity))
        .route("/api/system", web::get().to(system_metrics));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn headers(id: &str, role: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            header::HeaderName::from_static("x-user-id"),
            HeaderValue::from_str(id).unwrap(),
        );
        map.insert(
            header::HeaderName::from_static("x-user-role"),
            HeaderValue::from_str(role).unwrap(),
        );
        map
    }

    #[test]
    fn viewer_from_headers() {
        let viewer = Viewer::from_headers(&headers("7", "lecturer")).unwrap();
        assert_eq!(viewer, Viewer { id: 7, role: Role::Lecturer });

        assert!(matches!(
            Viewer::from_headers(&headers("abc", "staff")),
            Err(AnalyticsError::Forbidden(_))
        ));
        assert!(Viewer::from_headers(&HeaderMap::new()).is_err());
    }

    #[test]
    fn forbidden_becomes_a_flash_redirect() {
        let response = AnalyticsError::Forbidden("No access".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/dashboard"
        );
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("flash="));
    }

    #[test]
    fn other_errors_keep_their_status() {
        assert_eq!(
            AnalyticsError::NotFound("course 9".to_string()).error_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AnalyticsError::InvalidInput("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
