//! Bounded worker pool over a per-scraper FIFO of jobs.
//!
//! The queue starts paused. Workers are spawned once with a fixed count,
//! so no more than that many jobs are ever handled at the same time.
//! Drain (nothing pending, nothing active) is evaluated under the same
//! lock that hands jobs out, and notifies the installed drain receiver
//! at most once.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::job::Job;

/// Processes one job taken from the queue.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: Job) -> impl Future<Output = ()> + Send;
}

struct QueueState {
    pending: VecDeque<Job>,
    active: usize,
    paused: bool,
    killed: bool,
    drain: Option<oneshot::Sender<()>>,
}

impl QueueState {
    fn notify_if_drained(&mut self) {
        if self.pending.is_empty() && self.active == 0 {
            if let Some(tx) = self.drain.take() {
                tracing::debug!("Queue drained");
                let _ = tx.send(());
            }
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self) -> Option<Job> {
        let mut state = self.lock();
        if state.paused || state.killed {
            return None;
        }
        let job = state.pending.pop_front()?;
        state.active += 1;
        Some(job)
    }

    fn finish(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.notify_if_drained();
    }

    async fn next_job(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(job) = self.try_take() {
                return Some(job);
            }

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = notified => {}
            }
        }
    }
}

/// Marks one taken job as finished when dropped, however its handler exits.
struct ActiveJob<'a>(&'a Shared);

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Per-scraper job queue.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Create an empty, paused queue.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: 0,
                    paused: true,
                    killed: false,
                    drain: None,
                }),
                notify: Notify::new(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Append a job. Returns false, dropping the job, once the queue is killed.
    pub fn push(&self, job: Job) -> bool {
        {
            let mut state = self.shared.lock();
            if state.killed {
                tracing::debug!(job_id = %job.id, "Queue killed, dropping job");
                return false;
            }
            state.pending.push_back(job);
        }
        self.shared.notify.notify_one();
        true
    }

    /// Number of jobs waiting for a worker.
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs currently being handled.
    pub fn active(&self) -> usize {
        self.shared.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn is_killed(&self) -> bool {
        self.shared.lock().killed
    }

    /// True when nothing is pending and no worker is busy.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.pending.is_empty() && state.active == 0
    }

    /// Stop handing out jobs. Jobs already taken run to completion.
    pub fn pause(&self) {
        self.shared.lock().paused = true;
    }

    /// Let workers take jobs again. Drain fires right away if there is nothing to do.
    pub fn resume(&self) {
        {
            let mut state = self.shared.lock();
            state.paused = false;
            state.notify_if_drained();
        }
        self.shared.notify.notify_waiters();
    }

    /// Install the drain notification, replacing any earlier one.
    pub fn on_drain(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.shared.lock().drain = Some(tx);
        rx
    }

    /// Spawn `concurrency` workers feeding jobs to `handler`.
    pub fn spawn_workers<H: JobHandler>(&self, concurrency: usize, handler: Arc<H>) {
        let concurrency = concurrency.max(1);
        tracing::debug!(%concurrency, "Spawning queue workers");
        for worker in 0..concurrency {
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&handler);
            self.shared.tracker.spawn(async move {
                while let Some(job) = shared.next_job().await {
                    let _active = ActiveJob(&shared);
                    let job_id = job.id;
                    tracing::trace!(%worker, %job_id, "Worker took job");
                    if AssertUnwindSafe(handler.handle(job)).catch_unwind().await.is_err() {
                        tracing::error!(%worker, %job_id, "Job handler panicked");
                    }
                }
                tracing::trace!(%worker, "Worker stopped");
            });
        }
    }

    /// Drop pending jobs and stop workers from taking more.
    ///
    /// In-flight jobs are not aborted.
    pub fn kill(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            state.killed = true;
            state.drain = None;
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        self.shared.cancel.cancel();
        self.shared.tracker.close();
        tracing::debug!(%dropped, "Queue killed");
    }

    /// Wait for every spawned worker to exit. Only returns after [`kill`](Self::kill).
    pub async fn wait(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::job::create_job;

    #[derive(Default)]
    struct RecordingHandler {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        handled: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl RecordingHandler {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn handled(&self) -> Vec<String> {
            self.handled.lock().unwrap().clone()
        }
    }

    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: Job) {
            if job.req.url.contains("panic") {
                panic!("handler blew up on {}", job.req.url);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.handled.lock().unwrap().push(job.req.url);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn job(url: &str) -> Job {
        create_job(url.into(), None).unwrap()
    }

    #[tokio::test]
    async fn test_starts_paused() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::default());
        queue.push(job("http://a"));
        queue.spawn_workers(2, handler.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_paused());
        assert_eq!(queue.len(), 1);
        assert!(handler.handled().is_empty());

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_resume_processes_everything_then_drains() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::default());
        for url in ["http://a", "http://b", "http://c"] {
            queue.push(job(url));
        }

        let drained = queue.on_drain();
        queue.spawn_workers(1, handler.clone());
        queue.resume();
        drained.await.unwrap();

        assert_eq!(handler.handled(), vec!["http://a", "http://b", "http://c"]);
        assert!(queue.is_idle());

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::with_delay(Duration::from_millis(15)));
        for i in 0..8 {
            queue.push(job(&format!("http://host/{i}")));
        }

        let drained = queue.on_drain();
        queue.spawn_workers(3, handler.clone());
        queue.resume();
        drained.await.unwrap();

        assert_eq!(handler.handled().len(), 8);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert!(handler.peak.load(Ordering::SeqCst) >= 2);

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_empty_queue_drains_on_resume() {
        let queue = JobQueue::new();
        let drained = queue.on_drain();
        queue.spawn_workers(1, Arc::new(RecordingHandler::default()));
        queue.resume();

        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .expect("drain should fire")
            .unwrap();

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_push_while_running_is_processed() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::with_delay(Duration::from_millis(20)));
        queue.push(job("http://a"));

        let drained = queue.on_drain();
        queue.spawn_workers(1, handler.clone());
        queue.resume();
        queue.push(job("http://b"));
        drained.await.unwrap();

        assert_eq!(handler.handled(), vec!["http://a", "http://b"]);

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_worker_alive() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::default());
        for url in ["http://panic", "http://a", "http://b"] {
            queue.push(job(url));
        }

        let drained = queue.on_drain();
        queue.spawn_workers(1, handler.clone());
        queue.resume();
        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .expect("queue should drain after a panic")
            .unwrap();

        assert_eq!(handler.handled(), vec!["http://a", "http://b"]);
        assert_eq!(queue.active(), 0);

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_pause_holds_new_jobs_until_resume() {
        let queue = JobQueue::new();
        let handler = Arc::new(RecordingHandler::default());
        queue.spawn_workers(1, handler.clone());
        queue.resume();

        queue.pause();
        assert!(queue.is_paused());
        queue.push(job("http://a"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handler.handled().is_empty());
        assert_eq!(queue.len(), 1);

        let drained = queue.on_drain();
        queue.resume();
        drained.await.unwrap();
        assert_eq!(handler.handled(), vec!["http://a"]);

        queue.kill();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_kill_drops_pending_jobs() {
        let queue = JobQueue::new();
        for url in ["http://a", "http://b"] {
            queue.push(job(url));
        }

        queue.kill();
        assert!(queue.is_killed());
        assert!(queue.is_empty());
        assert!(!queue.push(job("http://c")));
        assert!(queue.is_empty());

        queue.wait().await;
    }
}
