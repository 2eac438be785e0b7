use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::AppError;
use crate::events::{EventBus, RunStatus, ScraperEvent};
use crate::queue::JobQueue;

/// Scraper-level lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Success,
    Fail,
    Ended,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Success => "success",
            Phase::Fail => "fail",
            Phase::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the scraper's lifecycle flags.
///
/// `paused` and `locked` are never set by the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScraperState {
    pub phase: Phase,
    pub fulfilled: bool,
    pub locked: bool,
    pub paused: bool,
    pub running: bool,
}

impl Default for ScraperState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            fulfilled: false,
            locked: false,
            paused: false,
            running: false,
        }
    }
}

/// Drives the phase transitions and publishes the matching events.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<ScraperState>,
    events: Arc<EventBus>,
}

impl Lifecycle {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(ScraperState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScraperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ScraperState {
        *self.lock()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Idle → Running. A scraper runs at most once.
    pub fn start(&self) -> Result<(), AppError> {
        {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                return Err(AppError::config(format!(
                    "scraper already ran (phase: {})",
                    state.phase
                )));
            }
            state.phase = Phase::Running;
            state.running = true;
        }
        self.events.emit(ScraperEvent::ScraperStart);
        Ok(())
    }

    pub fn fail(&self, error: &AppError) {
        self.lock().phase = Phase::Fail;
        self.events.emit(ScraperEvent::ScraperFail { error });
    }

    pub fn succeed(&self) {
        self.lock().phase = Phase::Success;
        self.events.emit(ScraperEvent::ScraperSuccess);
    }

    pub fn exit(&self, status: RunStatus) {
        self.events.emit(ScraperEvent::ScraperEnd { status });
    }

    /// Kill the queue and detach observers. Only the first call has any effect.
    pub fn teardown(&self, queue: &JobQueue) {
        {
            let mut state = self.lock();
            if state.fulfilled {
                return;
            }
            state.fulfilled = true;
            state.running = false;
            state.phase = Phase::Ended;
        }
        self.events.emit(ScraperEvent::ScraperTeardown);
        queue.kill();
        self.events.clear();
    }
}
