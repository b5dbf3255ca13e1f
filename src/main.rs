use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lms_analytics::config::Settings;
use lms_analytics::mailer::{LogTransport, MailQueue, RetryPolicy};
use lms_analytics::monitor::SystemMonitor;
use lms_analytics::render::pdf::Logo;
use lms_analytics::render::{PdfRenderer, ReportRenderer};
use lms_analytics::web as routes;
use lms_analytics::{AnalyticsService, Course, Database, Period, Student};

#[derive(Parser)]
#[command(name = "lms-analytics")]
#[command(about = "Performance analytics, learner insights and result sheets for the LMS", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Create the database schema
    InitDb,
    /// Add or update a course, optionally allocating it to a lecturer
    AddCourse {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        code: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        level: String,
        #[arg(long)]
        lecturer: Option<i64>,
    },
    /// Import students from a CSV file (id, student_no, full_name, email)
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import a lecturer's score sheet (student_id, quiz, assignment, attendance, total)
    ImportScores {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        course: i64,
        #[arg(long)]
        lecturer: i64,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        academic_year: String,
    },
    /// Recompute lecturer rollups for every allocation, and optionally one course rollup
    RefreshRollups {
        #[arg(long)]
        semester: String,
        #[arg(long)]
        academic_year: String,
        #[arg(long)]
        course: Option<i64>,
    },
    /// Print the learning insight for a student in a course
    Insights {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        course: i64,
    },
    /// Cluster a course cohort into learning patterns
    Patterns {
        #[arg(long)]
        course: i64,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        academic_year: String,
    },
    /// Write the result sheet PDF for a course
    ResultSheet {
        #[arg(long)]
        course: i64,
        #[arg(long)]
        lecturer: i64,
        #[arg(long)]
        lecturer_name: Option<String>,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        session: String,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lms_analytics=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    let db = Database::connect(&settings.database_url)
        .await
        .with_context(|| format!("failed to open database {}", settings.database_url))?;

    let logo = settings
        .logo
        .as_deref()
        .map(Logo::load)
        .transpose()
        .context("failed to load result sheet logo")?;
    let service = AnalyticsService::new(db, PdfRenderer::new(logo), settings.media_root.clone());

    match cli.command {
        Commands::Serve => serve(service, &settings).await?,
        Commands::InitDb => {
            service.db().migrate().await?;
            println!("Schema ready.");
        }
        Commands::AddCourse {
            id,
            code,
            title,
            level,
            lecturer,
        } => {
            let course = Course {
                id,
                code,
                title,
                level,
            };
            service.db().upsert_course(&course).await?;
            if let Some(lecturer) = lecturer {
                service.db().allocate_course(lecturer, id).await?;
            }
            println!("Saved {course}.");
        }
        Commands::ImportStudents { csv } => {
            let mut reader = csv::Reader::from_path(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let mut imported = 0usize;
            for row in reader.deserialize::<Student>() {
                service.db().upsert_student(&row?).await?;
                imported += 1;
            }
            println!("Imported {imported} students.");
        }
        Commands::ImportScores {
            csv,
            course,
            lecturer,
            semester,
            academic_year,
        } => {
            let file = File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
            let period = Period::new(semester, academic_year);
            let outcome = service
                .import_scores_csv(lecturer, course, &period, file)
                .await?;
            println!("Stored {} score lines.", outcome.saved);
            if let Some(rollup) = outcome.lecturer_rollup {
                println!("{}", serde_json::to_string_pretty(&rollup)?);
            }
        }
        Commands::RefreshRollups {
            semester,
            academic_year,
            course,
        } => {
            let period = Period::new(semester, academic_year);
            let refreshed = service.refresh_all_lecturer_rollups(&period).await?;
            println!("Refreshed {} lecturer rollups.", refreshed.len());
            if let Some(course) = course {
                match service.refresh_course_rollup(course, &period).await? {
                    Some(rollup) => println!("{}", serde_json::to_string_pretty(&rollup)?),
                    None => println!("No records for course {course} in {period}."),
                }
            }
        }
        Commands::Insights { student, course } => {
            match service.student_insight(student, course).await? {
                Some(insight) => println!("{}", serde_json::to_string_pretty(&insight)?),
                None => println!("No records for student {student} in course {course}."),
            }
        }
        Commands::Patterns {
            course,
            semester,
            academic_year,
        } => {
            let period = Period::new(semester, academic_year);
            let patterns = service.course_patterns(course, &period).await?;
            println!("{}", serde_json::to_string_pretty(&patterns)?);
        }
        Commands::ResultSheet {
            course,
            lecturer,
            lecturer_name,
            semester,
            session,
        } => {
            let period = Period::new(semester, session);
            let sheet = service
                .result_sheet(lecturer, lecturer_name.as_deref(), course, &period)
                .await?;
            println!("Result sheet written to {}", sheet.path.display());
        }
    }

    Ok(())
}

async fn serve(service: AnalyticsService, settings: &Settings) -> anyhow::Result<()> {
    let service = web::Data::new(service);
    let renderer = web::Data::new(ReportRenderer::new()?);
    let monitor = web::Data::new(SystemMonitor::new());
    let queue = web::Data::new(MailQueue::start(
        Arc::new(LogTransport),
        settings.mail_workers,
        settings.mail_queue,
        RetryPolicy::default(),
    ));

    info!("Starting LMS analytics on http://{}", settings.bind);

    let app_queue = queue.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .app_data(renderer.clone())
            .app_data(monitor.clone())
            .app_data(app_queue.clone())
            .wrap(from_fn(routes::track_requests))
            .configure(routes::configure)
    })
    .bind(&settings.bind)
    .with_context(|| format!("failed to bind {}", settings.bind))?
    .run()
    .await?;

    match Arc::try_unwrap(queue.into_inner()) {
        Ok(queue) => {
            let stats = queue.shutdown().await;
            info!(
                delivered = stats.delivered,
                gave_up = stats.gave_up,
                failed = stats.failed,
                "mail queue drained"
            );
        }
        Err(_) => warn!("mail queue still shared at shutdown, pending emails dropped"),
    }
    Ok(())
}
