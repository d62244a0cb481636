//! Progress reporting with cooperative cancellation for long-running opens.
//!
//! Work running on a [`BackgroundWorker`] calls [`ProgressReporter::report`] at
//! its yield points. Once the shared [`CancellationToken`] is set, the next
//! report returns [`CascError::Cancelled`], which unwinds the work through `?`
//! and is turned into [`WorkerOutcome::Cancelled`] at the worker boundary.

use crate::error::{CascError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// A shared, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type ProgressCallback = Box<dyn Fn(u8, &str) + Send + Sync>;

/// Reports progress to an optional callback unless cancellation was requested.
#[derive(Default)]
pub struct ProgressReporter {
    token: CancellationToken,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("cancelled", &self.token.is_cancelled())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            callback: None,
        }
    }

    /// Adds a callback receiving `(percent, message)` for every accepted report.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8, &str) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reports progress, or fails with [`CascError::Cancelled`] if the token is set.
    pub fn report(&self, percent: u8, message: &str) -> Result<()> {
        if self.token.is_cancelled() {
            debug!("Cancellation observed at '{message}'");
            return Err(CascError::Cancelled);
        }
        if let Some(callback) = &self.callback {
            callback(percent.min(100), message);
        }
        Ok(())
    }
}

/// How a background operation ended.
#[derive(Debug)]
pub enum WorkerOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(CascError),
}

impl<T> WorkerOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkerOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerOutcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkerOutcome::Failed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            WorkerOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Result<T>> for WorkerOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => WorkerOutcome::Completed(value),
            Err(CascError::Cancelled) => WorkerOutcome::Cancelled,
            Err(err) => WorkerOutcome::Failed(err),
        }
    }
}

/// Runs one operation on a dedicated thread.
pub struct BackgroundWorker<T> {
    token: CancellationToken,
    handle: JoinHandle<WorkerOutcome<T>>,
}

impl<T: Send + 'static> BackgroundWorker<T> {
    /// Spawns `work`, handing it `reporter` for progress and cancellation.
    pub fn spawn<F>(reporter: ProgressReporter, work: F) -> Self
    where
        F: FnOnce(&ProgressReporter) -> Result<T> + Send + 'static,
    {
        let token = reporter.token().clone();
        let handle = std::thread::spawn(move || WorkerOutcome::from(work(&reporter)));
        Self { token, handle }
    }

    /// Requests cancellation; the work stops at its next progress report.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the work to end.
    pub fn join(self) -> WorkerOutcome<T> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => WorkerOutcome::Failed(CascError::InvalidData(
                "Background worker panicked".to_string(),
            )),
        }
    }
}
