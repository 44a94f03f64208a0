//! Per-task download lifecycle.
//!
//! Phases of one attempt:
//! 1. Acquire a download URL (bounded by `download_url` timeout)
//! 2. Open the body stream and create the parent directory
//! 3. Stream chunks into a temporary file, hashing as they arrive
//! 4. Check the received size and digest
//! 5. Rename the temporary file over the target
//!
//! Attempts are driven by a [`RetryStateMachine`]; cancellation is observed
//! before each attempt, during every network wait and during backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::PoolContext;
use super::partial::PartialFile;
use crate::checksum::Verification;
use crate::error::TaskError;
use crate::retry::{AttemptState, IsRetryable, RetryStateMachine};
use crate::types::{DownloadTask, SyncEvent, TaskAction};

/// Drain the shared queue until it is empty or the pool is cancelled
pub(super) async fn run_worker(index: usize, ctx: Arc<PoolContext>) {
    tracing::debug!(worker = index, "Worker started");
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let next = ctx.queue.lock().await.pop_front();
        let Some(task) = next else {
            break;
        };
        process_task(&ctx, task).await;
    }
    tracing::debug!(worker = index, "Worker finished");
}

async fn process_task(ctx: &PoolContext, task: DownloadTask) {
    if task.action() == TaskAction::Skip {
        ctx.record_success(&task).await;
        return;
    }

    ctx.emit(SyncEvent::TaskStarted {
        path: task.target_path.clone(),
        action: task.action(),
    });

    match download_with_retry(ctx, &task).await {
        Ok(()) => {
            tracing::info!(
                product = %task.product.name,
                file = %task.source.filename,
                path = %task.target_path.display(),
                action = %task.action(),
                "Downloaded"
            );
            ctx.record_success(&task).await;
        }
        Err(e) => {
            if e.is_fatal() {
                ctx.abort(e.to_string()).await;
            }
            if matches!(e, TaskError::Cancelled) {
                tracing::debug!(path = %task.target_path.display(), "Download cancelled");
            } else {
                tracing::error!(
                    product = %task.product.name,
                    file = %task.source.filename,
                    error = %e,
                    "Download failed"
                );
            }
            ctx.record_failure(&task, e.kind(), e.to_string()).await;
        }
    }
}

async fn download_with_retry(ctx: &PoolContext, task: &DownloadTask) -> Result<(), TaskError> {
    let mut machine = RetryStateMachine::new(&ctx.options.retry);
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        machine.start_attempt();

        let error = match attempt(ctx, task).await {
            Ok(()) => {
                machine.record_success();
                return Ok(());
            }
            Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
            Err(e) => e,
        };

        match machine.record_failure(error.is_retryable()).clone() {
            AttemptState::Retrying { attempt, delay } => {
                tracing::warn!(
                    path = %task.target_path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Download attempt failed, retrying"
                );
                ctx.emit(SyncEvent::TaskRetrying {
                    path: task.target_path.clone(),
                    attempt,
                    delay,
                    error: error.to_string(),
                });
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(TaskError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            _ => return Err(error),
        }
    }
}

/// Await `fut` under `limit`, giving up early if the pool is cancelled
async fn guarded<T>(
    ctx: &PoolContext,
    limit: Duration,
    stage: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, TaskError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TaskError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => outcome.map_err(|_| TaskError::Timeout(stage)),
    }
}

async fn attempt(ctx: &PoolContext, task: &DownloadTask) -> Result<(), TaskError> {
    let timeouts = &ctx.options.timeouts;
    let target = &task.target_path;

    let url = guarded(
        ctx,
        timeouts.download_url,
        "acquiring the download URL",
        ctx.catalog.get_download_url(&task.product.id, &task.source.id),
    )
    .await??;

    let body = guarded(
        ctx,
        timeouts.download_stall,
        "starting the download",
        ctx.catalog.download(&url),
    )
    .await??;
    let declared_size = body.declared_size;
    let mut chunks = body.chunks;

    // Safe to race with siblings: create_dir_all tolerates existing directories
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TaskError::io(parent, e))?;
    }

    let mut partial = PartialFile::create(target)
        .await
        .map_err(|e| TaskError::io(target, e))?;
    let mut check = ctx.validator.begin(task.source.checksum.as_ref());
    let mut received: u64 = 0;

    loop {
        let next = guarded(ctx, timeouts.download_stall, "downloading", chunks.next()).await?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        check.update(&chunk);
        partial
            .write_all(&chunk)
            .await
            .map_err(|e| TaskError::io(partial.path(), e))?;
        received += chunk.len() as u64;
    }
    drop(chunks);

    if let Some(declared) = declared_size
        && declared != received
    {
        return Err(TaskError::SizeMismatch { declared, received });
    }
    if let Verification::Mismatch { expected, actual } = check.finish() {
        return Err(TaskError::ChecksumMismatch { expected, actual });
    }

    partial
        .commit(target)
        .await
        .map_err(|e| TaskError::io(target, e))
}
