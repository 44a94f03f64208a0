//! Dry-run reporting: classify planned tasks without touching the network or disk.

use crate::types::{DownloadTask, SyncResult, TaskAction};

/// Describes what a real run would do
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunReporter;

impl DryRunReporter {
    /// Create a reporter
    pub fn new() -> Self {
        Self
    }

    /// One line for a task, `None` for skipped ones
    pub fn describe(&self, task: &DownloadTask) -> Option<String> {
        let verb = match task.action() {
            TaskAction::Create => "would create",
            TaskAction::Update => "would update",
            TaskAction::Skip => return None,
        };
        Some(format!(
            "{verb} {} ({} / {})",
            task.target_path.display(),
            task.product.name,
            task.source.filename
        ))
    }

    /// Log one line per non-skipped task and count actions as a real run would
    pub fn run(&self, tasks: &[DownloadTask]) -> SyncResult {
        let mut result = SyncResult::default();
        for task in tasks {
            if let Some(line) = self.describe(task) {
                tracing::info!(action = %task.action(), "{line}");
            }
            result.record_success(task.action());
        }
        tracing::info!(%result, "Dry run finished");
        result
    }
}
