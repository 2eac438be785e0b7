//! The scraper: configuration surface plus the `run` lifecycle.
//!
//! Setup calls take `&mut self` and are only legal before the run starts.
//! `run` and the feed calls take `&self`, so feeds can be added while a
//! run is in progress (or from anywhere through a [`FeedHandle`]).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{EventBus, EventKind, Observer, RunStatus, ScraperEvent};
use crate::job::{Feed, Job, JobRequest, JobResponse, create_job, feeds_from_json};
use crate::lifecycle::{Lifecycle, Phase, ScraperState};
use crate::middleware::{Hook, Middleware, Middlewares, run_start_series};
use crate::options::{OptionsPatch, ScraperOptions};
use crate::queue::JobQueue;
use crate::runner::JobRunner;
use crate::script::ScriptSource;
use crate::traits::{Engine, FetchContext, Parser};

/// Bundles related setup calls so they can be applied in one go.
pub trait Plugin<E: Engine> {
    fn configure(&self, scraper: &mut Scraper<E>) -> Result<(), AppError>;
}

impl<E, F> Plugin<E> for F
where
    E: Engine,
    F: Fn(&mut Scraper<E>) -> Result<(), AppError>,
{
    fn configure(&self, scraper: &mut Scraper<E>) -> Result<(), AppError> {
        self(scraper)
    }
}

/// Cloneable handle for pushing feeds into a scraper's queue.
#[derive(Clone)]
pub struct FeedHandle {
    queue: JobQueue,
    events: Arc<EventBus>,
    lifecycle: Arc<Lifecycle>,
}

impl FeedHandle {
    /// Queue one feed. Emits `job:added` when the scraper is running.
    pub fn add_feed(&self, feed: impl Into<Feed>) -> Result<Uuid, AppError> {
        let job = create_job(feed.into(), None)?;
        Ok(self.push(job))
    }

    fn push(&self, job: Job) -> Uuid {
        let id = job.id;
        if self.lifecycle.is_running() {
            self.events.emit(ScraperEvent::JobAdded { job: &job });
        }
        if !self.queue.push(job) {
            tracing::warn!(job_id = %id, "Scraper already ended, feed dropped");
        }
        id
    }
}

/// Tears the scraper down if `run` is dropped before it finishes.
struct TeardownGuard<'a> {
    lifecycle: &'a Lifecycle,
    queue: &'a JobQueue,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if self.lifecycle.is_running() {
            tracing::warn!("Scraper run dropped before completion");
        }
        self.lifecycle.teardown(self.queue);
    }
}

pub struct Scraper<E: Engine> {
    id: Uuid,
    options: ScraperOptions,
    engine: Arc<E>,
    middlewares: Middlewares,
    parser: Option<Parser>,
    script: Option<ScriptSource>,
    events: Arc<EventBus>,
    feeds: FeedHandle,
}

impl<E: Engine> fmt::Debug for Scraper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scraper")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("middlewares", &self.middlewares)
            .field("script", &self.script)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Scraper<E> {
    pub fn new(engine: E) -> Self {
        Self::with_options(engine, ScraperOptions::default())
    }

    pub fn with_options(engine: E, options: ScraperOptions) -> Self {
        let events = Arc::new(EventBus::new());
        let lifecycle = Arc::new(Lifecycle::new(Arc::clone(&events)));
        Self {
            id: Uuid::new_v4(),
            options,
            engine: Arc::new(engine),
            middlewares: Middlewares::default(),
            parser: None,
            script: None,
            events: Arc::clone(&events),
            feeds: FeedHandle {
                queue: JobQueue::new(),
                events,
                lifecycle,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ScraperOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn state(&self) -> ScraperState {
        self.feeds.lifecycle.state()
    }

    pub fn script(&self) -> Option<&ScriptSource> {
        self.script.as_ref()
    }

    pub fn middleware_count(&self, hook: Hook) -> usize {
        self.middlewares.count(hook)
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.feeds.queue.len()
    }

    pub fn handle(&self) -> FeedHandle {
        self.feeds.clone()
    }

    fn ensure_idle(&self, what: &str) -> Result<(), AppError> {
        match self.feeds.lifecycle.phase() {
            Phase::Idle => Ok(()),
            phase => Err(AppError::config(format!(
                "cannot {what} once the scraper has started (phase: {phase})"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    pub fn add_feed(&self, feed: impl Into<Feed>) -> Result<Uuid, AppError> {
        let job = create_job(feed.into(), self.options.timeout)?;
        Ok(self.feeds.push(job))
    }

    /// Queue several feeds. Nothing is queued if any feed is invalid.
    pub fn add_feeds<I, F>(&self, feeds: I) -> Result<Vec<Uuid>, AppError>
    where
        I: IntoIterator<Item = F>,
        F: Into<Feed>,
    {
        let jobs = feeds
            .into_iter()
            .map(|feed| create_job(feed.into(), self.options.timeout))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs.into_iter().map(|job| self.feeds.push(job)).collect())
    }

    /// Queue feeds from raw JSON: a URL string, a feed object, or an array of either.
    pub fn add_feeds_json(&self, value: serde_json::Value) -> Result<Vec<Uuid>, AppError> {
        self.add_feeds(feeds_from_json(value)?)
    }

    // -----------------------------------------------------------------------
    // Middlewares
    // -----------------------------------------------------------------------

    pub fn register_middleware(&mut self, middleware: Middleware) -> Result<&mut Self, AppError> {
        self.ensure_idle("register middleware")?;
        tracing::debug!(hook = %middleware.hook(), "Registering middleware");
        self.middlewares.register(middleware);
        Ok(self)
    }

    pub fn before<F>(&mut self, stage: F) -> Result<&mut Self, AppError>
    where
        F: for<'a> Fn(&'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_middleware(Middleware::before(stage))
    }

    pub fn after<F>(&mut self, stage: F) -> Result<&mut Self, AppError>
    where
        F: for<'a> Fn(&'a ScraperOptions) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_middleware(Middleware::after(stage))
    }

    pub fn before_scraping<F>(&mut self, stage: F) -> Result<&mut Self, AppError>
    where
        F: for<'a> Fn(&'a mut JobRequest) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_middleware(Middleware::before_scraping(stage))
    }

    pub fn after_scraping<F>(&mut self, stage: F) -> Result<&mut Self, AppError>
    where
        F: for<'a> Fn(&'a mut JobRequest, &'a mut JobResponse) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_middleware(Middleware::after_scraping(stage))
    }

    // -----------------------------------------------------------------------
    // Engine, parser, script
    // -----------------------------------------------------------------------

    pub fn set_engine(&mut self, engine: E) -> Result<&mut Self, AppError> {
        self.ensure_idle("replace the engine")?;
        self.engine = Arc::new(engine);
        Ok(self)
    }

    /// Register the automation script. Allowed once per scraper.
    pub fn set_script(&mut self, script: ScriptSource) -> Result<&mut Self, AppError> {
        self.ensure_idle("set the automation script")?;
        if self.script.is_some() {
            return Err(AppError::config("automation script already registered"));
        }
        self.script = Some(script);
        Ok(self)
    }

    pub fn set_parser<F>(&mut self, parser: F) -> Result<&mut Self, AppError>
    where
        F: Fn(&str, &JobRequest) -> Result<serde_json::Value, AppError> + Send + Sync + 'static,
    {
        self.ensure_idle("set the parser")?;
        self.parser = Some(Arc::new(parser));
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------------

    pub fn configure(&mut self, patch: OptionsPatch) -> Result<&mut Self, AppError> {
        self.ensure_idle("change options")?;
        self.options = self.options.merge(patch)?;
        Ok(self)
    }

    pub fn configure_json(&mut self, value: serde_json::Value) -> Result<&mut Self, AppError> {
        self.configure(OptionsPatch::from_json(value)?)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<&mut Self, AppError> {
        self.configure(OptionsPatch::default().with_timeout(timeout))
    }

    pub fn use_plugin<P: Plugin<E>>(&mut self, plugin: P) -> Result<&mut Self, AppError> {
        plugin.configure(self)?;
        Ok(self)
    }

    /// Run a one-off setup closure against the scraper.
    pub fn apply<F>(&mut self, f: F) -> Result<&mut Self, AppError>
    where
        F: FnOnce(&mut Self) -> Result<(), AppError>,
    {
        f(self)?;
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn subscribe<O: Observer + 'static>(&self, observer: O) -> &Self {
        self.events.subscribe(observer);
        self
    }

    pub fn on<F>(&self, kind: EventKind, f: F) -> &Self
    where
        F: Fn(&ScraperEvent<'_>) + Send + Sync + 'static,
    {
        self.events.on(kind, f);
        self
    }

    /// Receive `(error, req, res)` for every finished job.
    pub fn on_result<F>(&self, f: F) -> &Self
    where
        F: Fn(Option<&AppError>, &JobRequest, &JobResponse) + Send + Sync + 'static,
    {
        self.events.on_result(f);
        self
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run every queued feed through the pipeline.
    ///
    /// Resolves once the queue drains. Job failures are reported through
    /// events only; `Err` means a `before` stage failed (no job ran) or the
    /// scraper had already been run.
    pub async fn run(&self) -> Result<(), AppError> {
        let lifecycle = &self.feeds.lifecycle;
        let queue = &self.feeds.queue;
        lifecycle.start()?;
        let _teardown = TeardownGuard { lifecycle, queue };

        let options = Arc::new(self.options.clone());
        tracing::info!(
            scraper = %options.name,
            id = %self.id,
            jobs = queue.len(),
            max_concurrency = options.max_concurrency,
            "Scraper running"
        );

        if let Err(error) = run_start_series(&self.middlewares.before, &options).await {
            lifecycle.fail(&error);
            lifecycle.exit(RunStatus::Fail);
            lifecycle.teardown(queue);
            return Err(error);
        }

        let drained = queue.on_drain();
        let ctx = FetchContext {
            options: Arc::clone(&options),
            parser: self.parser.clone(),
            script: self.script.clone(),
        };
        let runner = JobRunner::new(
            Arc::clone(&self.engine),
            Arc::new(self.middlewares.clone()),
            ctx,
            Arc::clone(&self.events),
        );
        queue.spawn_workers(options.max_concurrency, Arc::new(runner));
        queue.resume();

        if drained.await.is_err() {
            tracing::warn!(id = %self.id, "Queue stopped before draining");
        }

        lifecycle.succeed();
        lifecycle.exit(RunStatus::Success);
        lifecycle.teardown(queue);
        queue.wait().await;
        Ok(())
    }
}
