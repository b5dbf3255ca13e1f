//! Performance aggregation and insight pipeline for an LMS: per-student
//! metrics, course and lecturer rollups, learner insights, cohort learning
//! patterns, HTML dashboards and PDF result sheets.

pub mod config;
pub mod error;
pub mod insights;
pub mod mailer;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod patterns;
pub mod render;
pub mod rollup;
pub mod service;
pub mod store;
pub mod web;

pub use error::{AnalyticsError, RenderError, Result};
pub use models::{Course, CourseRollup, LecturerRollup, Period, PerformanceRecord, Role, Student};
pub use service::AnalyticsService;
pub use store::Database;
