//! End-to-end sync run: catalog listing, planning, downloading.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::download::{DownloadManager, DownloadOptions};
use crate::error::{CatalogError, Error, PlanningError, Result};
use crate::planner::SyncPlanner;
use crate::retry::{AttemptState, IsRetryable, RetryStateMachine};
use crate::types::{AbortReason, Product, SyncEvent, SyncResult};

/// Everything a run found out
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    /// Task outcome counts and failures
    pub result: SyncResult,
    /// Catalog entries that could not be planned
    pub planning_errors: Vec<PlanningError>,
    /// Library files no catalog entry maps to
    pub stale_entries: Vec<PathBuf>,
}

impl SyncReport {
    /// Process exit code for the run
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code()
    }
}

/// Runs one sync of the library against a catalog
pub struct Syncer {
    config: Config,
    catalog: Arc<dyn Catalog>,
    planner: SyncPlanner,
    manager: DownloadManager,
}

impl Syncer {
    /// Create a syncer; the configuration is assumed validated
    pub fn new(config: Config, catalog: Arc<dyn Catalog>) -> Self {
        let planner = SyncPlanner::from_config(&config);
        let manager = DownloadManager::new(Arc::clone(&catalog), DownloadOptions::from_config(&config));
        Self {
            config,
            catalog,
            planner,
            manager,
        }
    }

    /// Progress events of the download phase
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.manager.subscribe()
    }

    /// Sync the library.
    ///
    /// # Errors
    /// Returns error if the library root is unusable or the product list
    /// cannot be fetched; per-file failures are reported in the result instead.
    pub async fn sync(&self, cancel: CancellationToken) -> Result<SyncReport> {
        self.check_library_root().await?;

        let Some(products) = self.fetch_products(&cancel).await? else {
            return Ok(SyncReport {
                result: SyncResult {
                    aborted: Some(AbortReason::Interrupted),
                    ..SyncResult::default()
                },
                ..SyncReport::default()
            });
        };
        let file_count: usize = products.iter().map(|p| p.files.len()).sum();
        tracing::info!(products = products.len(), files = file_count, "Fetched catalog");

        let plan = self.planner.plan(&products).await;
        if !plan.planning_errors.is_empty() {
            tracing::warn!(
                count = plan.planning_errors.len(),
                "Some catalog entries could not be planned"
            );
        }
        for path in &plan.stale_entries {
            tracing::info!(path = %path.display(), "Not in catalog, left in place");
        }

        let result = self.manager.run(plan.tasks, cancel).await;
        for failure in &result.failures {
            tracing::error!(
                path = %failure.target_path.display(),
                kind = %failure.kind,
                error = %failure.message,
                "Failed"
            );
        }
        match &result.aborted {
            Some(AbortReason::Fatal(cause)) => tracing::error!(%cause, "Sync aborted"),
            Some(AbortReason::Interrupted) => tracing::warn!("Sync interrupted"),
            None => {}
        }
        tracing::info!("Done! {result}");

        Ok(SyncReport {
            result,
            planning_errors: plan.planning_errors,
            stale_entries: plan.stale_entries,
        })
    }

    async fn check_library_root(&self) -> Result<()> {
        let root = &self.config.library_path;
        let inaccessible = |source| Error::LibraryInaccessible {
            path: root.clone(),
            source,
        };

        // A dry run never writes, so a missing root is simply an empty library
        if self.config.dry_run {
            return match tokio::fs::metadata(root).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                Ok(_) => Err(inaccessible(std::io::Error::other("not a directory"))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(inaccessible(e)),
            };
        }

        tokio::fs::create_dir_all(root).await.map_err(inaccessible)?;
        let meta = tokio::fs::metadata(root).await.map_err(inaccessible)?;
        if meta.permissions().readonly() {
            return Err(inaccessible(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "library directory is read-only",
            )));
        }
        Ok(())
    }

    /// `Ok(None)` when cancelled
    async fn fetch_products(&self, cancel: &CancellationToken) -> Result<Option<Vec<Product>>> {
        let mut machine = RetryStateMachine::new(&self.config.retry);
        loop {
            machine.start_attempt();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                outcome = self.catalog.list_products() => outcome,
            };
            let error: CatalogError = match outcome {
                Ok(products) => {
                    machine.record_success();
                    return Ok(Some(products));
                }
                Err(e) => e,
            };

            match machine.record_failure(error.is_retryable()).clone() {
                AttemptState::Retrying { attempt, delay } => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Fetching products failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                _ => return Err(Error::Catalog(error)),
            }
        }
    }
}
