use std::path::PathBuf;

use clap::Args;

/// Process-wide settings. Every flag falls back to an environment variable,
/// which may itself come from a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// SQLite connection string
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://lms_analytics.db?mode=rwc",
        global = true
    )]
    pub database_url: String,

    /// Address the HTTP server binds to
    #[arg(long, env = "LMS_BIND", default_value = "127.0.0.1:8080", global = true)]
    pub bind: String,

    /// Directory generated files are written under
    #[arg(long, env = "LMS_MEDIA_ROOT", default_value = "media", global = true)]
    pub media_root: PathBuf,

    /// JPEG embedded at the top of every result sheet
    #[arg(long, env = "LMS_LOGO", global = true)]
    pub logo: Option<PathBuf>,

    /// Workers draining the email queue
    #[arg(long, env = "LMS_MAIL_WORKERS", default_value_t = 2, global = true)]
    pub mail_workers: usize,

    /// Emails that can wait in the queue before new ones are refused
    #[arg(long, env = "LMS_MAIL_QUEUE", default_value_t = 64, global = true)]
    pub mail_queue: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn flags_override_defaults() {
        let harness = Harness::parse_from([
            "lms-analytics",
            "--media-root",
            "/srv/media",
            "--mail-workers",
            "4",
        ]);
        assert_eq!(harness.settings.media_root, PathBuf::from("/srv/media"));
        assert_eq!(harness.settings.mail_workers, 4);
        assert!(harness.settings.logo.is_none() || std::env::var("LMS_LOGO").is_ok());
    }
}
