use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("csv import failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Shown to the user as a flash message, never as an error page.
    #[error("{0}")]
    Forbidden(String),
}

/// Failures from the templating or PDF layer. Never retried.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("template render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for RenderError {
    fn from(err: lopdf::Error) -> Self {
        RenderError::Pdf(err.to_string())
    }
}
