//! Download manager: executes planned tasks on a fixed worker pool.
//!
//! Split into focused submodules:
//! - [`worker`] - Per-task lifecycle: URL acquisition, streaming, verification, retry
//! - [`partial`] - Temporary files renamed into place on success
//!
//! # Concurrency
//!
//! `concurrency` workers drain one shared queue. A worker checks the pool's
//! cancellation token before dequeuing each task and between retry attempts,
//! and every network wait races against it. A fatal catalog error (token
//! rejected) cancels the pool; a user interrupt cancels it from outside.
//! Tasks left in the queue are reported as cancelled failures so the result
//! still accounts for every task.

mod partial;
mod worker;


use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::checksum::ChecksumValidator;
use crate::config::{Config, RetryConfig, TimeoutConfig};
use crate::dry_run::DryRunReporter;
use crate::types::{
    AbortReason, DownloadTask, FailureKind, SyncEvent, SyncResult, TaskAction, TaskFailure,
};

pub(crate) use partial::is_partial_file;

/// Capacity of the progress event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Settings for one download run
#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Number of concurrent workers (at least 1)
    pub concurrency: usize,
    /// Retry policy for transient failures and checksum mismatches
    pub retry: RetryConfig,
    /// Network timeouts
    pub timeouts: TimeoutConfig,
    /// Verify downloaded bytes against the catalog checksum
    pub verify_checksums: bool,
    /// Report what would be done instead of doing it
    pub dry_run: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            verify_checksums: false,
            dry_run: false,
        }
    }
}

impl DownloadOptions {
    /// Options derived from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.threads,
            retry: config.retry.clone(),
            timeouts: config.timeouts.clone(),
            verify_checksums: config.verify_downloads(),
            dry_run: config.dry_run,
        }
    }
}

/// State shared by every worker of one run
pub(crate) struct PoolContext {
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) options: DownloadOptions,
    pub(crate) validator: ChecksumValidator,
    pub(crate) event_tx: broadcast::Sender<SyncEvent>,
    pub(crate) queue: Mutex<VecDeque<DownloadTask>>,
    pub(crate) result: Mutex<SyncResult>,
    /// First fatal cause; set at most once
    pub(crate) fatal: Mutex<Option<String>>,
    /// Cancelled on fatal error or user interrupt
    pub(crate) cancel: CancellationToken,
}

impl PoolContext {
    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }

    pub(crate) async fn record_success(&self, task: &DownloadTask) {
        self.result.lock().await.record_success(task.action());
        self.emit(SyncEvent::TaskCompleted {
            path: task.target_path.clone(),
            action: task.action(),
        });
    }

    pub(crate) async fn record_failure(&self, task: &DownloadTask, kind: FailureKind, message: String) {
        self.emit(SyncEvent::TaskFailed {
            path: task.target_path.clone(),
            kind,
            message: message.clone(),
        });
        self.result.lock().await.record_failure(TaskFailure {
            target_path: task.target_path.clone(),
            kind,
            message,
        });
    }

    /// Record the fatal cause (first one wins) and stop the pool
    pub(crate) async fn abort(&self, cause: String) {
        {
            let mut fatal = self.fatal.lock().await;
            if fatal.is_none() {
                tracing::error!(error = %cause, "Fatal error, cancelling remaining downloads");
                *fatal = Some(cause);
            }
        }
        self.cancel.cancel();
    }
}

/// Runs download tasks across a bounded pool of workers
pub struct DownloadManager {
    catalog: Arc<dyn Catalog>,
    options: DownloadOptions,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl DownloadManager {
    /// Create a manager fetching from `catalog`
    pub fn new(catalog: Arc<dyn Catalog>, options: DownloadOptions) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            catalog,
            options,
            event_tx,
        }
    }

    /// Subscribe to progress events
    ///
    /// Multiple subscribers are supported; a slow subscriber misses events
    /// (`RecvError::Lagged`) rather than slowing downloads.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Options this manager runs with
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Execute `tasks` and aggregate the outcome.
    ///
    /// Cancelling `cancel` interrupts the run: in-flight downloads stop at
    /// their next await point, their temporary files are removed, and
    /// completed files stay in place. The returned result then carries
    /// [`AbortReason::Interrupted`]. In dry-run mode nothing is fetched or
    /// written and the [`DryRunReporter`] classification is returned.
    pub async fn run(&self, tasks: Vec<DownloadTask>, cancel: CancellationToken) -> SyncResult {
        if self.options.dry_run {
            return DryRunReporter::new().run(&tasks);
        }

        let total = tasks.len();
        let pending = tasks
            .iter()
            .filter(|t| t.action() != TaskAction::Skip)
            .count();
        let workers = self.options.concurrency.max(1).min(pending.max(1));
        tracing::info!(
            tasks = total,
            downloads = pending,
            workers,
            "Starting downloads"
        );

        let ctx = Arc::new(PoolContext {
            catalog: Arc::clone(&self.catalog),
            options: self.options.clone(),
            validator: ChecksumValidator::new(self.options.verify_checksums),
            event_tx: self.event_tx.clone(),
            queue: Mutex::new(tasks.into_iter().collect()),
            result: Mutex::new(SyncResult::default()),
            fatal: Mutex::new(None),
            cancel: cancel.child_token(),
        });

        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { worker::run_worker(index, ctx).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Download worker panicked");
            }
        }

        // Tasks never dequeued because the pool was cancelled
        let leftover: Vec<DownloadTask> = ctx.queue.lock().await.drain(..).collect();
        for task in &leftover {
            ctx.record_failure(task, FailureKind::Cancelled, "not started: run cancelled".to_string())
                .await;
        }

        let mut result = std::mem::take(&mut *ctx.result.lock().await);
        result.aborted = match ctx.fatal.lock().await.take() {
            Some(cause) => Some(AbortReason::Fatal(cause)),
            None if cancel.is_cancelled() => Some(AbortReason::Interrupted),
            None => None,
        };

        // A worker that panicked loses its task; account for it rather than under-count
        let accounted = result.total();
        if accounted < total {
            tracing::error!(
                expected = total,
                accounted,
                "Some tasks were lost by crashed workers"
            );
            result.failed += total - accounted;
        }

        if let Some(reason) = &result.aborted {
            self.event_tx
                .send(SyncEvent::RunAborted {
                    reason: reason.clone(),
                })
                .ok();
        }
        tracing::info!(%result, "Downloads finished");
        result
    }
}
