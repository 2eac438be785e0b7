pub mod error;
pub mod events;
pub mod job;
pub mod lifecycle;
pub mod middleware;
pub mod options;
pub mod queue;
pub mod runner;
pub mod scraper;
pub mod script;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::AppError;
pub use events::{EventBus, EventKind, Observer, RunStatus, ScraperEvent, TracingObserver};
pub use job::{Feed, FeedSpec, Job, JobRequest, JobResponse, create_job};
pub use middleware::{Hook, Middleware};
pub use options::{OptionsPatch, ScraperOptions};
pub use scraper::{FeedHandle, Plugin, Scraper};
pub use script::ScriptSource;
pub use traits::{Engine, FetchContext, Parser};
