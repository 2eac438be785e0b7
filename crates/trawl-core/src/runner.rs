use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::AppError;
use crate::events::{EventBus, ScraperEvent};
use crate::job::Job;
use crate::middleware::{Middlewares, run_request_series, run_response_series};
use crate::queue::JobHandler;
use crate::traits::{Engine, FetchContext};

/// Drives one job through `beforeScraping → fetch → afterScraping` and
/// publishes the outcome.
///
/// Everything it holds is frozen when the run starts and only read from
/// the worker tasks.
pub struct JobRunner<E: Engine> {
    engine: Arc<E>,
    middlewares: Arc<Middlewares>,
    ctx: FetchContext,
    events: Arc<EventBus>,
}

impl<E: Engine> JobRunner<E> {
    pub fn new(
        engine: Arc<E>,
        middlewares: Arc<Middlewares>,
        ctx: FetchContext,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            middlewares,
            ctx,
            events,
        }
    }

    async fn process(&self, job: &mut Job) -> Result<(), AppError> {
        if job.req.timeout.is_none() {
            job.req.timeout = self.ctx.options.timeout;
        }

        run_request_series(&self.middlewares.before_scraping, &mut job.req).await?;

        tracing::debug!(job_id = %job.id, url = %job.req.url, "Fetching");
        self.engine.fetch(job, &self.ctx).await?;

        run_response_series(
            &self.middlewares.after_scraping,
            &mut job.req,
            &mut job.res,
        )
        .await
    }
}

impl<E: Engine> JobHandler for JobRunner<E> {
    async fn handle(&self, mut job: Job) {
        let outcome = AssertUnwindSafe(self.process(&mut job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(AppError::Generic(format!(
                    "job panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match outcome {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, "Job pipeline complete");
                self.events.emit(ScraperEvent::JobSuccess { job: &job });
            }
            Err(error) => {
                job.res.error = Some(error.clone());
                self.events.emit(ScraperEvent::JobFail {
                    error: &error,
                    job: &job,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
