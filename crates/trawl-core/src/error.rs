use std::time::Duration;

use thiserror::Error;

/// Error types shared by the scraper, its stages and its engines.
///
/// Values are `Clone` because a job error is recorded on the job's
/// response and also handed to every `job:fail` observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Invalid arguments to a setup call (missing URL, duplicate script,
    /// bad option shape). Raised at call time and never recovered.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out. Carries the limit in milliseconds.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Result extraction failed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Automation script could not be loaded or evaluated.
    #[error("Script error: {0}")]
    Script(String),

    /// A middleware stage rejected the job or the run.
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn timeout(limit: Duration) -> Self {
        AppError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn middleware(msg: impl Into<String>) -> Self {
        AppError::Middleware(msg.into())
    }

    /// Returns true for errors caused by invalid setup rather than by a job.
    pub fn is_configuration(&self) -> bool {
        matches!(self, AppError::Configuration(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(AppError::config("no url provided").is_configuration());
        assert!(!AppError::HttpError("502".into()).is_configuration());
        assert!(!AppError::Timeout(30).is_configuration());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AppError::config("no url provided").to_string(),
            "Configuration error: no url provided"
        );
        assert_eq!(
            AppError::Timeout(5).to_string(),
            "Request timed out after 5 ms"
        );
        assert_eq!(
            AppError::timeout(Duration::from_millis(500)).to_string(),
            "Request timed out after 500 ms"
        );
        assert_eq!(AppError::Generic("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_serde_error_maps_to_configuration() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(AppError::from(err).is_configuration());
    }
}
