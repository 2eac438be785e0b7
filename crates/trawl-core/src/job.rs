use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Caller-supplied description of one page to process.
///
/// Deserializes from either a bare JSON string or an object, so raw input
/// such as `"https://example.com"` or `{"url": "...", "data": {...}}` is
/// normalised without inspecting types at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feed {
    Url(String),
    Spec(FeedSpec),
}

/// Object form of a [`Feed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSpec {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    /// Per-job timeout in milliseconds.
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl FeedSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

impl From<&str> for Feed {
    fn from(url: &str) -> Self {
        Feed::Url(url.to_string())
    }
}

impl From<String> for Feed {
    fn from(url: String) -> Self {
        Feed::Url(url)
    }
}

impl From<FeedSpec> for Feed {
    fn from(spec: FeedSpec) -> Self {
        Feed::Spec(spec)
    }
}

/// Mutable request state carried through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub url: String,
    pub data: Map<String, Value>,
    pub params: Map<String, Value>,
    /// Reserved for a retry policy; the pipeline never changes it.
    pub retries: u32,
    /// Advisory; engines decide how to enforce it.
    pub timeout: Option<Duration>,
}

/// Result state, filled in by the engine and the post-fetch stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResponse {
    pub status: Option<u16>,
    /// Final URL after redirects, when the engine knows it.
    pub url: Option<String>,
    pub body: Option<String>,
    pub data: Option<Value>,
    pub error: Option<AppError>,
}

/// The unit of work derived from one feed.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub original: Feed,
    pub req: JobRequest,
    pub res: JobResponse,
    pub state: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn url(&self) -> &str {
        &self.req.url
    }
}

/// Normalise a feed into a fresh [`Job`].
///
/// A feed object must carry a non-empty `url`. A zero or missing feed
/// timeout falls back to `default_timeout`.
pub fn create_job(feed: Feed, default_timeout: Option<Duration>) -> Result<Job, AppError> {
    let req = match &feed {
        Feed::Url(url) => JobRequest {
            url: require_url(Some(url))?,
            data: Map::new(),
            params: Map::new(),
            retries: 0,
            timeout: default_timeout,
        },
        Feed::Spec(spec) => JobRequest {
            url: require_url(spec.url.as_ref())?,
            data: spec.data.clone().unwrap_or_default(),
            params: spec.params.clone().unwrap_or_default(),
            retries: 0,
            timeout: spec
                .timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .or(default_timeout),
        },
    };

    Ok(Job {
        id: Uuid::new_v4(),
        original: feed,
        req,
        res: JobResponse::default(),
        state: Map::new(),
        created_at: Utc::now(),
    })
}

fn require_url(url: Option<&String>) -> Result<String, AppError> {
    match url {
        Some(u) if !u.trim().is_empty() => Ok(u.clone()),
        _ => Err(AppError::config("no url provided")),
    }
}

/// Parse raw JSON input (a string, an object, or an array of either) into feeds.
pub fn feeds_from_json(value: Value) -> Result<Vec<Feed>, AppError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(AppError::from))
            .collect(),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}
