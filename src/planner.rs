//! Sync planning: compares the remote catalog with the local library.
//!
//! For every catalog file the planner resolves a target path and decides once
//! whether to create, update or skip it:
//!
//! 1. No local file: [`TaskAction::Create`]
//! 2. Remote `last_modified` newer than the local mtime: [`TaskAction::Update`]
//! 3. Otherwise, with checksums enabled, a local digest differing from the
//!    catalog's: [`TaskAction::Update`]
//! 4. Otherwise: [`TaskAction::Skip`]
//!
//! Files in the library that no task targets are reported as stale and left alone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::checksum::{ChecksumValidator, Verification};
use crate::config::Config;
use crate::download::is_partial_file;
use crate::error::PlanningError;
use crate::naming::PathResolver;
use crate::types::{
    DownloadTask, FileMetadata, LocalFileRecord, Product, SyncPlan, TaskAction,
};

/// Local files inspected concurrently while planning
const PLANNING_CONCURRENCY: usize = 8;

/// Builds the task list for a run
#[derive(Clone, Debug)]
pub struct SyncPlanner {
    root: PathBuf,
    resolver: PathResolver,
    use_checksums: bool,
}

impl SyncPlanner {
    /// Planner for `root` using `resolver`; `use_checksums` enables the local digest check
    pub fn new(root: impl Into<PathBuf>, resolver: PathResolver, use_checksums: bool) -> Self {
        Self {
            root: root.into(),
            resolver,
            use_checksums,
        }
    }

    /// Planner configured from the run configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.library_path.clone(),
            PathResolver::new(config.naming.mode(), config.naming.omit_publisher),
            config.planner_checksums(),
        )
    }

    /// Library root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compare `products` with the library and produce the plan.
    ///
    /// Malformed or unresolvable entries are recorded in
    /// [`SyncPlan::planning_errors`] and do not stop planning of the rest.
    pub async fn plan(&self, products: &[Product]) -> SyncPlan {
        let mut plan = SyncPlan::default();
        let mut known_paths = HashSet::new();
        let mut candidates = Vec::new();

        for (product, file, resolved) in self.resolver.resolve_catalog(products) {
            let target = resolved.map(|relative| self.root.join(relative));
            // A malformed entry still claims its path so the local copy is not reported stale
            if let Ok(target) = &target {
                known_paths.insert(target.clone());
            }
            if let Err(e) = check_entry(product, file) {
                tracing::warn!(error = %e, "Skipping catalog entry");
                plan.planning_errors.push(e);
                continue;
            }
            match target {
                Ok(target) => candidates.push((product, file, target)),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping catalog entry");
                    plan.planning_errors.push(e);
                }
            }
        }

        let decisions: Vec<_> = stream::iter(candidates)
            .map(|(product, file, target)| async move {
                let decision = self.decide(product, file, &target).await;
                (product, file, target, decision)
            })
            .buffered(PLANNING_CONCURRENCY)
            .collect()
            .await;

        for (product, file, target, decision) in decisions {
            match decision {
                Ok(action) => plan.tasks.push(DownloadTask::new(
                    product.clone(),
                    file.clone(),
                    target,
                    action,
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping catalog entry");
                    plan.planning_errors.push(e);
                }
            }
        }

        let root = self.root.clone();
        plan.stale_entries =
            match tokio::task::spawn_blocking(move || find_stale_entries(&root, &known_paths))
                .await
            {
                Ok(stale) => stale,
                Err(e) => {
                    tracing::error!(error = %e, "Stale entry scan panicked");
                    Vec::new()
                }
            };

        tracing::debug!(
            create = plan.count(TaskAction::Create),
            update = plan.count(TaskAction::Update),
            skip = plan.count(TaskAction::Skip),
            errors = plan.planning_errors.len(),
            stale = plan.stale_entries.len(),
            "Plan ready"
        );
        plan
    }

    async fn decide(
        &self,
        product: &Product,
        file: &FileMetadata,
        target: &Path,
    ) -> Result<TaskAction, PlanningError> {
        let local = inspect_local(target)
            .await
            .map_err(|e| PlanningError::LocalInspection {
                path: target.to_path_buf(),
                reason: e.to_string(),
            })?;

        let Some(local) = local else {
            tracing::debug!(
                product = %product.name,
                file = %file.filename,
                "Needs download: local file does not exist"
            );
            return Ok(TaskAction::Create);
        };

        // check_entry guarantees last_modified is present
        let remote_modified = file.last_modified.unwrap_or(DateTime::<Utc>::MIN_UTC);
        if is_newer(remote_modified, local.mtime) {
            tracing::debug!(
                product = %product.name,
                file = %file.filename,
                "Needs download: local file is outdated"
            );
            return Ok(TaskAction::Update);
        }

        if self.use_checksums {
            let validator = ChecksumValidator::new(true);
            let verification = validator
                .verify_file(target, file.checksum.as_ref())
                .await
                .map_err(|e| PlanningError::LocalInspection {
                    path: target.to_path_buf(),
                    reason: e.to_string(),
                })?;
            if let Verification::Mismatch { expected, actual } = verification {
                tracing::debug!(
                    product = %product.name,
                    file = %file.filename,
                    expected = %expected,
                    actual = %actual,
                    "Needs download: checksum mismatch"
                );
                return Ok(TaskAction::Update);
            }
        }

        tracing::info!(product = %product.name, file = %file.filename, "Up to date");
        Ok(TaskAction::Skip)
    }
}

fn check_entry(product: &Product, file: &FileMetadata) -> Result<(), PlanningError> {
    let reason = if file.id.as_str().trim().is_empty() {
        Some(format!("missing file id for {:?}", file.filename))
    } else if file.filename.trim().is_empty() {
        Some(format!("missing filename for file id {}", file.id))
    } else if file.last_modified.is_none() {
        Some(format!("missing or invalid last_modified for {}", file.filename))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PlanningError::MalformedEntry {
            product: product.name.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Remote is newer when it is later at whole-second precision
fn is_newer(remote: DateTime<Utc>, local: DateTime<Utc>) -> bool {
    remote.timestamp() > local.timestamp()
}

/// Inspect a library path; `Ok(None)` when nothing is there
pub async fn inspect_local(path: &Path) -> std::io::Result<Option<LocalFileRecord>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() {
        return Err(std::io::Error::other("target exists and is not a regular file"));
    }
    Ok(Some(LocalFileRecord {
        path: path.to_path_buf(),
        mtime: DateTime::<Utc>::from(metadata.modified()?),
        size_bytes: metadata.len(),
    }))
}

/// Regular files under `root` that are not in `known`, sorted; leftover
/// partial downloads are ignored
pub fn find_stale_entries(root: &Path, known: &HashSet<PathBuf>) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    let mut stale: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable library entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !is_partial_file(entry.file_name()))
        .map(walkdir::DirEntry::into_path)
        .filter(|path| !known.contains(path))
        .collect();
    stale.sort();
    stale
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
