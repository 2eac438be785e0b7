//! Test utilities: a mock engine and a recording observer.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! State lives behind `Arc<Mutex<_>>` so tests can assert on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::events::{Observer, RunStatus, ScraperEvent};
use crate::job::Job;
use crate::traits::{Engine, FetchContext};

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

/// Engine that succeeds for every URL unless told otherwise.
#[derive(Clone, Default)]
pub struct MockEngine {
    failures: Arc<Mutex<HashMap<String, AppError>>>,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each fetch for `delay` so overlapping fetches can be observed.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every fetch of `url` with `error`.
    pub fn failing_for(self, url: &str, error: AppError) -> Self {
        self.failures.lock().unwrap().insert(url.to_string(), error);
        self
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of fetches observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    async fn fetch(&self, job: &mut Job, ctx: &FetchContext) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(job.req.url.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failures.lock().unwrap().get(&job.req.url).cloned();
        if let Some(error) = failure {
            return Err(error);
        }

        let body = format!("<html><body>{}</body></html>", job.req.url);
        job.res.status = Some(200);
        job.res.data = ctx.parse(&body, &job.req)?;
        job.res.body = Some(body);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Owned copy of an emitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: &'static str,
    pub url: Option<String>,
    pub error: Option<AppError>,
    pub status: Option<RunStatus>,
}

/// Observer that keeps every event it sees.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name == name).count()
    }

    /// URLs of events with the given name, in emission order.
    pub fn urls(&self, name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .filter_map(|e| e.url)
            .collect()
    }

    pub fn job_errors(&self) -> Vec<(String, AppError)> {
        self.events()
            .into_iter()
            .filter(|e| e.name == "job:fail")
            .filter_map(|e| Some((e.url?, e.error?)))
            .collect()
    }

    pub fn scraper_errors(&self) -> Vec<AppError> {
        self.events()
            .into_iter()
            .filter(|e| e.name == "scraper:fail")
            .filter_map(|e| e.error)
            .collect()
    }

    pub fn end_statuses(&self) -> Vec<RunStatus> {
        self.events().into_iter().filter_map(|e| e.status).collect()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, event: &ScraperEvent<'_>) {
        let (url, error, status) = match event {
            ScraperEvent::JobAdded { job } | ScraperEvent::JobSuccess { job } => {
                (Some(job.req.url.clone()), None, None)
            }
            ScraperEvent::JobFail { error, job } => {
                (Some(job.req.url.clone()), Some((*error).clone()), None)
            }
            ScraperEvent::ScraperFail { error } => (None, Some((*error).clone()), None),
            ScraperEvent::ScraperEnd { status } => (None, None, Some(*status)),
            ScraperEvent::ScraperStart
            | ScraperEvent::ScraperSuccess
            | ScraperEvent::ScraperTeardown => (None, None, None),
        };
        self.events.lock().unwrap().push(RecordedEvent {
            name: event.name(),
            url,
            error,
            status,
        });
    }
}
