use std::future::Future;
use std::sync::Arc;

use crate::error::AppError;
use crate::job::{Job, JobRequest};
use crate::options::ScraperOptions;
use crate::script::ScriptSource;

/// Result-extraction function used by engines that fetch raw documents.
///
/// Receives the response body and the job's request state.
pub type Parser = Arc<dyn Fn(&str, &JobRequest) -> Result<serde_json::Value, AppError> + Send + Sync>;

/// Read-only data shared with the engine for every job of a run.
#[derive(Clone, Default)]
pub struct FetchContext {
    pub options: Arc<ScraperOptions>,
    pub parser: Option<Parser>,
    pub script: Option<ScriptSource>,
}

impl FetchContext {
    /// Apply the registered parser, if any, to a fetched body.
    pub fn parse(&self, body: &str, req: &JobRequest) -> Result<Option<serde_json::Value>, AppError> {
        self.parser.as_ref().map(|parse| parse(body, req)).transpose()
    }
}

/// Performs the network or automation work for one job.
///
/// Called concurrently for up to `max_concurrency` jobs, so implementations
/// keep no per-job state of their own. Findings go into `job.res`; errors
/// are recorded on the job verbatim.
// TODO: expose a cancellation token once engines can abort in-flight work
pub trait Engine: Send + Sync + 'static {
    fn fetch(
        &self,
        job: &mut Job,
        ctx: &FetchContext,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
