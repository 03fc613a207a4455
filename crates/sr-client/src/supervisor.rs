//! Supervised task execution
//!
//! Every concurrent unit of work in the client (telemetry ticks, user
//! commands, probe batches, GeoIP lookups, late-session cleanup) goes
//! through [`TaskSupervisor`]. A panic inside a unit is caught at the
//! unit's boundary, recorded, and turned into [`SrError::TaskFailure`];
//! the event loop and sibling tasks keep running.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use sr_core::SrError;

/// Number of failure records kept for display
const FAILURE_HISTORY: usize = 32;

/// A caught task failure
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub task: String,
    pub message: String,
    pub at: DateTime<Local>,
}

type Reporter = Box<dyn Fn(&FailureRecord) + Send + Sync>;

/// Launch point for all concurrent work
#[derive(Default)]
pub struct TaskSupervisor {
    failures: Mutex<VecDeque<FailureRecord>>,
    total: AtomicU64,
    reporter: Option<Reporter>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supervisor that also hands every caught failure to `reporter`
    pub fn with_reporter(reporter: impl Fn(&FailureRecord) + Send + Sync + 'static) -> Self {
        Self {
            reporter: Some(Box::new(reporter)),
            ..Self::default()
        }
    }

    /// Run `fut` to completion inside a failure boundary.
    ///
    /// Returns the future's output, or `TaskFailure` if it panicked.
    pub async fn run<F>(&self, task: &str, fut: F) -> Result<F::Output, SrError>
    where
        F: Future,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(output) => Ok(output),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(task, %message, "Supervised task panicked");
                self.record(task, &message);
                Err(SrError::TaskFailure {
                    task: task.to_string(),
                    message,
                })
            }
        }
    }

    /// Spawn `fut` onto the runtime inside a failure boundary.
    ///
    /// The join handle yields `None` if the task panicked.
    pub fn spawn<F>(
        self: &Arc<Self>,
        task: impl Into<String>,
        fut: F,
    ) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let supervisor = Arc::clone(self);
        let task = task.into();
        tokio::spawn(async move { supervisor.run(&task, fut).await.ok() })
    }

    /// Total number of caught failures since startup
    pub fn failure_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Most recent failures, oldest first
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().iter().cloned().collect()
    }

    fn record(&self, task: &str, message: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let record = FailureRecord {
            task: task.to_string(),
            message: message.to_string(),
            at: Local::now(),
        };
        {
            let mut failures = self.failures.lock();
            if failures.len() == FAILURE_HISTORY {
                failures.pop_front();
            }
            failures.push_back(record.clone());
        }
        if let Some(reporter) = &self.reporter {
            reporter(&record);
        }
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic info>".to_string()
    }
}

/// Route panic reports through `tracing` instead of stderr.
///
/// The terminal belongs to the UI while it runs, so the default hook's
/// output would corrupt the screen. The hook records payload, location,
/// thread and a backtrace; the supervisor then records the failure itself.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = panic_message(info.payload());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");
        let backtrace = std::backtrace::Backtrace::force_capture();

        tracing::error!(
            %payload,
            %location,
            thread,
            "panic at {}\n{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            backtrace
        );
    }));
}
