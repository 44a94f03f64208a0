//! Core types for drpg

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Opaque remote identifier of a purchased product
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

/// Opaque remote identifier of a file within a product (the storefront's bundle id)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(ProductId);
string_id!(FileId);

/// Expected digest of a remote file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm identifier as published by the catalog (e.g. "md5")
    pub algorithm: String,
    /// Lowercase hex digest
    pub digest: String,
}

impl Checksum {
    /// MD5 digest, the only kind the storefront publishes today
    pub fn md5(digest: impl Into<String>) -> Self {
        Self {
            algorithm: "md5".to_string(),
            digest: digest.into(),
        }
    }
}

/// One purchasable file version as seen at fetch time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Remote identifier used to request a download URL
    pub id: FileId,
    /// Remote filename, not yet normalized
    pub filename: String,
    /// Newest published checksum, if any
    pub checksum: Option<Checksum>,
    /// Remote modification time; `None` when the catalog entry lacks or garbles it
    pub last_modified: Option<DateTime<Utc>>,
    /// Size in bytes, when the catalog reports it
    pub size_bytes: Option<u64>,
}

/// A purchased product and its files; an immutable snapshot for one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Remote identifier
    pub id: ProductId,
    /// Product name, not yet normalized
    pub name: String,
    /// Publisher name, not yet normalized
    pub publisher: String,
    /// Files belonging to the product
    pub files: Vec<FileMetadata>,
}

/// Snapshot of a file already present in the library
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFileRecord {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Local modification time
    pub mtime: DateTime<Utc>,
    /// Size on disk
    pub size_bytes: u64,
}

/// What a download task will do, decided once by the planner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    /// No local file exists
    Create,
    /// The local file is outdated or corrupt
    Update,
    /// The local file is up to date
    Skip,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskAction::Create => "create",
            TaskAction::Update => "update",
            TaskAction::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// One unit of work produced by the planner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Remote file to fetch
    pub source: FileMetadata,
    /// Product the file belongs to
    pub product: Product,
    /// Absolute destination path
    pub target_path: PathBuf,
    /// Immutable action
    action: TaskAction,
}

impl DownloadTask {
    /// Create a task; the action cannot change afterwards
    pub fn new(
        product: Product,
        source: FileMetadata,
        target_path: PathBuf,
        action: TaskAction,
    ) -> Self {
        Self {
            source,
            product,
            target_path,
            action,
        }
    }

    /// Action decided by the planner
    pub fn action(&self) -> TaskAction {
        self.action
    }
}

/// Output of one planning pass
#[derive(Clone, Debug, Default)]
pub struct SyncPlan {
    /// Tasks in catalog order
    pub tasks: Vec<DownloadTask>,
    /// Entries excluded from the plan
    pub planning_errors: Vec<crate::error::PlanningError>,
    /// Local files no task targets; reported, never deleted
    pub stale_entries: Vec<PathBuf>,
}

impl SyncPlan {
    /// Number of tasks with the given action
    pub fn count(&self, action: TaskAction) -> usize {
        self.tasks.iter().filter(|t| t.action() == action).count()
    }
}

/// Classification of a recorded task failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout or remote 5xx after all retries
    Network,
    /// Checksum or size mismatch after all retries
    Integrity,
    /// Permission denied, disk full, ...
    Filesystem,
    /// The remote file or URL no longer exists
    NotFound,
    /// Rate limiting did not clear up within the retry budget
    RateLimited,
    /// Unexpected response shape
    Malformed,
    /// Authentication rejected while running this task
    Fatal,
    /// Not run or interrupted because the run was cancelled
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Integrity => "integrity",
            FailureKind::Filesystem => "filesystem",
            FailureKind::NotFound => "not found",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Malformed => "malformed response",
            FailureKind::Fatal => "fatal",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A failed task with enough detail to retry it manually
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Destination path of the task
    pub target_path: PathBuf,
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable cause
    pub message: String,
}

/// Why a run stopped before draining its queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "message")]
pub enum AbortReason {
    /// Authentication or authorization was rejected
    Fatal(String),
    /// The user interrupted the run
    Interrupted,
}

/// Aggregate outcome of a run
///
/// `created + updated + skipped + failed` always equals the number of tasks
/// handed to the run; tasks never started because of an abort count as failed
/// with [`FailureKind::Cancelled`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Files downloaded that did not exist before
    pub created: usize,
    /// Files replaced with a newer or correct version
    pub updated: usize,
    /// Files left untouched
    pub skipped: usize,
    /// Tasks that did not complete
    pub failed: usize,
    /// Failures in completion order
    pub failures: Vec<TaskFailure>,
    /// Set when the run stopped early
    pub aborted: Option<AbortReason>,
}

impl SyncResult {
    /// Total number of tasks accounted for
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    /// Count a successfully completed task
    pub fn record_success(&mut self, action: TaskAction) {
        match action {
            TaskAction::Create => self.created += 1,
            TaskAction::Update => self.updated += 1,
            TaskAction::Skip => self.skipped += 1,
        }
    }

    /// Count a failed task
    pub fn record_failure(&mut self, failure: TaskFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }

    /// Whether every task completed and the run was not aborted
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }

    /// Process exit code for the run: 0 ok, 1 partial failure, 2 fatal, 130 interrupted
    pub fn exit_code(&self) -> i32 {
        match &self.aborted {
            Some(AbortReason::Fatal(_)) => 2,
            Some(AbortReason::Interrupted) => 130,
            None if self.failed > 0 => 1,
            None => 0,
        }
    }
}

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created: {}, updated: {}, skipped: {}, failed: {}",
            self.created, self.updated, self.skipped, self.failed
        )
    }
}

/// Progress events emitted by the download manager
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A worker picked up a task
    TaskStarted {
        /// Destination path
        path: PathBuf,
        /// Planned action
        action: TaskAction,
    },
    /// An attempt failed and will be retried
    TaskRetrying {
        /// Destination path
        path: PathBuf,
        /// Attempt number that failed (1-based)
        attempt: u32,
        /// Backoff before the next attempt
        #[serde(with = "duration_millis")]
        delay: Duration,
        /// Failure of the attempt
        error: String,
    },
    /// The file is in place (or was skipped)
    TaskCompleted {
        /// Destination path
        path: PathBuf,
        /// Planned action
        action: TaskAction,
    },
    /// The task was recorded as failed
    TaskFailed {
        /// Destination path
        path: PathBuf,
        /// Failure classification
        kind: FailureKind,
        /// Failure message
        message: String,
    },
    /// The pool was cancelled
    RunAborted {
        /// Why the run stopped
        reason: AbortReason,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
