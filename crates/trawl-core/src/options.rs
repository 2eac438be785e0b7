use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppError;

/// Scraper configuration snapshot.
///
/// Treated as an immutable value: [`ScraperOptions::merge`] returns a new
/// snapshot and the scraper freezes the current one when a run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperOptions {
    pub name: String,
    /// Upper bound on jobs processed at the same time.
    pub max_concurrency: usize,
    /// Default per-job timeout, applied to feeds that carry none.
    pub timeout: Option<Duration>,
    /// Engine-specific settings, passed through untouched.
    pub engine: Map<String, Value>,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            name: "trawl".to_string(),
            max_concurrency: 1,
            timeout: None,
            engine: Map::new(),
        }
    }
}

/// Partial update for [`ScraperOptions`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct OptionsPatch {
    pub name: Option<String>,
    pub max_concurrency: Option<usize>,
    /// Milliseconds.
    pub timeout: Option<u64>,
    /// Merged key by key into the existing engine settings.
    pub engine: Option<Map<String, Value>>,
}

impl OptionsPatch {
    pub fn from_json(value: Value) -> Result<Self, AppError> {
        serde_json::from_value(value)
            .map_err(|e| AppError::config(format!("invalid options: {e}")))
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl ScraperOptions {
    /// Apply a patch, producing a new snapshot.
    pub fn merge(&self, patch: OptionsPatch) -> Result<Self, AppError> {
        let mut merged = self.clone();

        if let Some(name) = patch.name {
            merged.name = name;
        }
        if let Some(max) = patch.max_concurrency {
            if max == 0 {
                return Err(AppError::config("maxConcurrency must be at least 1"));
            }
            merged.max_concurrency = max;
        }
        if let Some(ms) = patch.timeout {
            merged.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(engine) = patch.engine {
            merged.engine.extend(engine);
        }

        Ok(merged)
    }
}
