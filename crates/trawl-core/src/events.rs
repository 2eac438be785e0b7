//! Per-scraper publish/subscribe channel for lifecycle and job events.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::AppError;
use crate::job::{Job, JobRequest, JobResponse};

/// Terminal outcome of a run, carried by `scraper:end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published by a scraper.
#[derive(Debug, Clone, Copy)]
pub enum ScraperEvent<'a> {
    /// A job was pushed while the scraper was running.
    JobAdded { job: &'a Job },
    JobFail { error: &'a AppError, job: &'a Job },
    JobSuccess { job: &'a Job },
    ScraperStart,
    ScraperFail { error: &'a AppError },
    ScraperSuccess,
    ScraperEnd { status: RunStatus },
    ScraperTeardown,
}

impl ScraperEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            ScraperEvent::JobAdded { .. } => EventKind::JobAdded,
            ScraperEvent::JobFail { .. } => EventKind::JobFail,
            ScraperEvent::JobSuccess { .. } => EventKind::JobSuccess,
            ScraperEvent::ScraperStart => EventKind::ScraperStart,
            ScraperEvent::ScraperFail { .. } => EventKind::ScraperFail,
            ScraperEvent::ScraperSuccess => EventKind::ScraperSuccess,
            ScraperEvent::ScraperEnd { .. } => EventKind::ScraperEnd,
            ScraperEvent::ScraperTeardown => EventKind::ScraperTeardown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Event names, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobAdded,
    JobFail,
    JobSuccess,
    ScraperStart,
    ScraperFail,
    ScraperSuccess,
    ScraperEnd,
    ScraperTeardown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobAdded => "job:added",
            EventKind::JobFail => "job:fail",
            EventKind::JobSuccess => "job:success",
            EventKind::ScraperStart => "scraper:start",
            EventKind::ScraperFail => "scraper:fail",
            EventKind::ScraperSuccess => "scraper:success",
            EventKind::ScraperEnd => "scraper:end",
            EventKind::ScraperTeardown => "scraper:teardown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job:added" => Ok(EventKind::JobAdded),
            "job:fail" => Ok(EventKind::JobFail),
            "job:success" => Ok(EventKind::JobSuccess),
            "scraper:start" => Ok(EventKind::ScraperStart),
            "scraper:fail" => Ok(EventKind::ScraperFail),
            "scraper:success" => Ok(EventKind::ScraperSuccess),
            "scraper:end" => Ok(EventKind::ScraperEnd),
            "scraper:teardown" => Ok(EventKind::ScraperTeardown),
            _ => Err(AppError::config(format!("unknown event: {s}"))),
        }
    }
}

/// Receives scraper events.
///
/// Called synchronously from whichever task emits, so implementations
/// should hand heavy work off rather than block.
pub trait Observer: Send + Sync {
    fn notify(&self, event: &ScraperEvent<'_>);
}

/// Observer that logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, event: &ScraperEvent<'_>) {
        match event {
            ScraperEvent::JobAdded { job } => {
                tracing::debug!(job_id = %job.id, url = %job.url(), "Job added");
            }
            ScraperEvent::JobFail { error, job } => {
                tracing::warn!(job_id = %job.id, url = %job.url(), %error, "Job failed");
            }
            ScraperEvent::JobSuccess { job } => {
                tracing::info!(job_id = %job.id, url = %job.url(), "Job succeeded");
            }
            ScraperEvent::ScraperStart => tracing::info!("Scraper started"),
            ScraperEvent::ScraperFail { error } => {
                tracing::error!(%error, "Scraper failed");
            }
            ScraperEvent::ScraperSuccess => tracing::info!("Scraper succeeded"),
            ScraperEvent::ScraperEnd { status } => {
                tracing::info!(%status, "Scraper ended");
            }
            ScraperEvent::ScraperTeardown => tracing::debug!("Scraper teardown"),
        }
    }
}

struct FnObserver<F>(F);

impl<F> Observer for FnObserver<F>
where
    F: Fn(&ScraperEvent<'_>) + Send + Sync,
{
    fn notify(&self, event: &ScraperEvent<'_>) {
        (self.0)(event)
    }
}

/// Observer list owned by one scraper.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<O: Observer + 'static>(&self, observer: O) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Subscribe a closure to every event.
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&ScraperEvent<'_>) + Send + Sync + 'static,
    {
        self.subscribe(FnObserver(f));
    }

    /// Subscribe a closure to one kind of event.
    pub fn on<F>(&self, kind: EventKind, f: F)
    where
        F: Fn(&ScraperEvent<'_>) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if event.kind() == kind {
                f(event)
            }
        });
    }

    /// Subscribe to both job outcomes with a normalised `(error, req, res)` triple.
    pub fn on_result<F>(&self, f: F)
    where
        F: Fn(Option<&AppError>, &JobRequest, &JobResponse) + Send + Sync + 'static,
    {
        self.on_event(move |event| match event {
            ScraperEvent::JobSuccess { job } => f(None, &job.req, &job.res),
            ScraperEvent::JobFail { error, job } => f(Some(*error), &job.req, &job.res),
            _ => {}
        });
    }

    pub fn emit(&self, event: ScraperEvent<'_>) {
        tracing::trace!(event = event.name(), "Emitting event");
        // Snapshot so observers run without holding the lock.
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer.notify(&event);
        }
    }

    /// Detach every observer.
    pub fn clear(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.len())
            .finish()
    }
}
