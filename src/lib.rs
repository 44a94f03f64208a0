//! # drpg
//!
//! Keeps a local directory tree in sync with a DriveThruRPG purchase library.
//!
//! A run lists the purchased products, decides per file whether it must be
//! created, updated or left alone, and downloads what is missing or stale on
//! a bounded pool of workers. Files land under
//! `library/[publisher/]product/filename`; the tree itself is the sync state.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use drpg::{Config, DrpgClient, Syncer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         token: "my-api-key".to_string(),
//!         ..Default::default()
//!     };
//!     config.validate()?;
//!
//!     let catalog = Arc::new(DrpgClient::new(&config)?);
//!     let syncer = Syncer::new(config, catalog);
//!
//!     // Subscribe to events
//!     let mut events = syncer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = syncer.sync(CancellationToken::new()).await?;
//!     println!("{}", report.result);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// DriveThruRPG HTTP client
pub mod api;
/// Remote catalog abstraction
pub mod catalog;
/// Checksum verification
pub mod checksum;
/// Configuration types
pub mod config;
/// Concurrent download pool
pub mod download;
/// Dry-run reporting
pub mod dry_run;
/// Error types
pub mod error;
/// Path naming and normalization
pub mod naming;
/// Sync planning
pub mod planner;
/// Retry logic with exponential backoff
pub mod retry;
/// End-to-end sync runs
pub mod sync;
/// Core types and events
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

use tokio_util::sync::CancellationToken;

// Re-export commonly used types
pub use api::DrpgClient;
pub use catalog::{ByteStream, Catalog};
pub use checksum::{ChecksumValidator, Verification};
pub use config::{Config, NamingConfig, RetryConfig, TimeoutConfig};
pub use download::{DownloadManager, DownloadOptions};
pub use dry_run::DryRunReporter;
pub use error::{CatalogError, Error, PlanningError, Result, TaskError};
pub use naming::{NamingMode, PathResolver};
pub use planner::SyncPlanner;
pub use sync::{SyncReport, Syncer};
pub use types::{
    AbortReason, Checksum, DownloadTask, FailureKind, FileId, FileMetadata, Product, ProductId,
    SyncEvent, SyncPlan, SyncResult, TaskAction, TaskFailure,
};

/// Termination signal that interrupted a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT or Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

/// Cancel `token` when the process receives a termination signal.
///
/// - **Unix:** SIGINT and SIGTERM; if neither handler can be registered, Ctrl+C.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The task ends without cancelling anything once `token` is cancelled
/// elsewhere. Completed files stay in place; in-flight downloads are
/// discarded and the run reports [`AbortReason::Interrupted`].
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            signal = wait_for_signal() => match signal {
                Some(signal) => {
                    tracing::warn!(%signal, "Interrupted, finishing up");
                    token.cancel();
                }
                // Nothing to listen to; the run can still finish normally
                None => token.cancelled().await,
            },
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let listen = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(error = %e, signal = name, "Could not register signal handler");
            None
        }
    };
    let mut interrupt = listen(SignalKind::interrupt(), "SIGINT");
    let mut terminate = listen(SignalKind::terminate(), "SIGTERM");

    if interrupt.is_none() && terminate.is_none() {
        tracing::error!("No signal handler registered, falling back to Ctrl+C");
        return match tokio::signal::ctrl_c().await {
            Ok(()) => Some(ShutdownSignal::Interrupt),
            Err(_) => None,
        };
    }

    tokio::select! {
        Some(()) = next_signal(interrupt.as_mut()) => Some(ShutdownSignal::Interrupt),
        Some(()) = next_signal(terminate.as_mut()) => Some(ShutdownSignal::Terminate),
        else => None,
    }
}

/// Next delivery on `stream`; pending forever when there is no stream
#[cfg(unix)]
async fn next_signal(stream: Option<&mut tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<ShutdownSignal> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some(ShutdownSignal::Interrupt),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            None
        }
    }
}
