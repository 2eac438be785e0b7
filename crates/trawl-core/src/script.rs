use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AppError;
use crate::job::JobRequest;

/// Automation script handed to script-capable engines.
#[derive(Clone)]
pub enum ScriptSource {
    /// Read from disk each time it is resolved.
    File(PathBuf),
    /// Script source text.
    Inline(String),
    /// Builds the script for a particular request.
    Function(Arc<dyn Fn(&JobRequest) -> String + Send + Sync>),
}

impl ScriptSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ScriptSource::File(path.into())
    }

    pub fn inline(source: impl Into<String>) -> Self {
        ScriptSource::Inline(source.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&JobRequest) -> String + Send + Sync + 'static,
    {
        ScriptSource::Function(Arc::new(f))
    }

    /// Produce the script text for one request.
    pub async fn resolve(&self, req: &JobRequest) -> Result<String, AppError> {
        match self {
            ScriptSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Script(format!("failed to read {}: {e}", path.display()))
            }),
            ScriptSource::Inline(source) => Ok(source.clone()),
            ScriptSource::Function(build) => Ok(build(req)),
        }
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::File(path) => f.debug_tuple("File").field(path).finish(),
            ScriptSource::Inline(source) => f
                .debug_tuple("Inline")
                .field(&format_args!("{} bytes", source.len()))
                .finish(),
            ScriptSource::Function(_) => f.write_str("Function(..)"),
        }
    }
}
