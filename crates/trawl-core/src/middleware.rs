//! Ordered stage lists for the four hook points, and the series runners
//! that drive them.
//!
//! A series runs its stages one after another against the same arguments
//! and stops at the first error, which is returned as-is. Stages after the
//! failing one never run.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::AppError;
use crate::job::{JobRequest, JobResponse};
use crate::options::ScraperOptions;

/// Stage run once when the scraper starts (or, reserved, when it ends).
pub trait StartStage: Send + Sync {
    fn call<'a>(&'a self, options: &'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>>;
}

impl<F> StartStage for F
where
    F: for<'a> Fn(&'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync,
{
    fn call<'a>(&'a self, options: &'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>> {
        self(options)
    }
}

/// Per-job stage run before the engine fetches.
pub trait RequestStage: Send + Sync {
    fn call<'a>(&'a self, req: &'a mut JobRequest) -> BoxFuture<'a, Result<(), AppError>>;
}

impl<F> RequestStage for F
where
    F: for<'a> Fn(&'a mut JobRequest) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync,
{
    fn call<'a>(&'a self, req: &'a mut JobRequest) -> BoxFuture<'a, Result<(), AppError>> {
        self(req)
    }
}

/// Per-job stage run after the engine fetched.
pub trait ResponseStage: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut JobRequest,
        res: &'a mut JobResponse,
    ) -> BoxFuture<'a, Result<(), AppError>>;
}

impl<F> ResponseStage for F
where
    F: for<'a> Fn(&'a mut JobRequest, &'a mut JobResponse) -> BoxFuture<'a, Result<(), AppError>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        req: &'a mut JobRequest,
        res: &'a mut JobResponse,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        self(req, res)
    }
}

/// Named hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Before,
    After,
    BeforeScraping,
    AfterScraping,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Before => "before",
            Hook::After => "after",
            Hook::BeforeScraping => "beforeScraping",
            Hook::AfterScraping => "afterScraping",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Hook::Before),
            "after" => Ok(Hook::After),
            "beforeScraping" => Ok(Hook::BeforeScraping),
            "afterScraping" => Ok(Hook::AfterScraping),
            _ => Err(AppError::config(format!("unknown middleware hook: {s}"))),
        }
    }
}

/// A stage bound to its hook, ready to register.
#[derive(Clone)]
pub enum Middleware {
    Before(Arc<dyn StartStage>),
    After(Arc<dyn StartStage>),
    BeforeScraping(Arc<dyn RequestStage>),
    AfterScraping(Arc<dyn ResponseStage>),
}

impl Middleware {
    pub fn before<F>(stage: F) -> Self
    where
        F: for<'a> Fn(&'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        Middleware::Before(Arc::new(stage))
    }

    pub fn after<F>(stage: F) -> Self
    where
        F: for<'a> Fn(&'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        Middleware::After(Arc::new(stage))
    }

    pub fn before_scraping<F>(stage: F) -> Self
    where
        F: for<'a> Fn(&'a mut JobRequest) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        Middleware::BeforeScraping(Arc::new(stage))
    }

    pub fn after_scraping<F>(stage: F) -> Self
    where
        F: for<'a> Fn(&'a mut JobRequest, &'a mut JobResponse) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        Middleware::AfterScraping(Arc::new(stage))
    }

    pub fn hook(&self) -> Hook {
        match self {
            Middleware::Before(_) => Hook::Before,
            Middleware::After(_) => Hook::After,
            Middleware::BeforeScraping(_) => Hook::BeforeScraping,
            Middleware::AfterScraping(_) => Hook::AfterScraping,
        }
    }
}

/// Registered stages, in registration order per hook.
#[derive(Clone, Default)]
pub struct Middlewares {
    pub before: Vec<Arc<dyn StartStage>>,
    /// Reserved: stored but not run by the lifecycle.
    pub after: Vec<Arc<dyn StartStage>>,
    pub before_scraping: Vec<Arc<dyn RequestStage>>,
    pub after_scraping: Vec<Arc<dyn ResponseStage>>,
}

impl Middlewares {
    pub fn register(&mut self, middleware: Middleware) {
        match middleware {
            Middleware::Before(stage) => self.before.push(stage),
            Middleware::After(stage) => self.after.push(stage),
            Middleware::BeforeScraping(stage) => self.before_scraping.push(stage),
            Middleware::AfterScraping(stage) => self.after_scraping.push(stage),
        }
    }

    pub fn count(&self, hook: Hook) -> usize {
        match hook {
            Hook::Before => self.before.len(),
            Hook::After => self.after.len(),
            Hook::BeforeScraping => self.before_scraping.len(),
            Hook::AfterScraping => self.after_scraping.len(),
        }
    }
}

impl fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middlewares")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("before_scraping", &self.before_scraping.len())
            .field("after_scraping", &self.after_scraping.len())
            .finish()
    }
}

pub async fn run_start_series(
    stages: &[Arc<dyn StartStage>],
    options: &ScraperOptions,
) -> Result<(), AppError> {
    for stage in stages {
        stage.call(options).await?;
    }
    Ok(())
}

pub async fn run_request_series(
    stages: &[Arc<dyn RequestStage>],
    req: &mut JobRequest,
) -> Result<(), AppError> {
    for stage in stages {
        stage.call(req).await?;
    }
    Ok(())
}

pub async fn run_response_series(
    stages: &[Arc<dyn ResponseStage>],
    req: &mut JobRequest,
    res: &mut JobResponse,
) -> Result<(), AppError> {
    for stage in stages {
        stage.call(req, res).await?;
    }
    Ok(())
}
