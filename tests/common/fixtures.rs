//! Catalog fixtures, library helpers and test configuration

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use drpg::{Config, RetryConfig};

/// Timestamp the fixture catalog publishes for every file
pub const REMOTE_MODIFIED: &str = "2024-01-02 03:04:05";

/// A file as the storefront knows it
#[derive(Clone, Debug)]
pub struct RemoteFile {
    /// Three-digit bundle id, unique across the catalog
    pub bundle_id: String,
    pub filename: String,
    /// Content the published checksum is computed from
    pub content: Vec<u8>,
    /// Content actually served, when different from `content`
    pub served: Option<Vec<u8>>,
}

impl RemoteFile {
    pub fn new(bundle_id: &str, filename: &str, content: &[u8]) -> Self {
        Self {
            bundle_id: bundle_id.to_string(),
            filename: filename.to_string(),
            content: content.to_vec(),
            served: None,
        }
    }

    /// Serve bytes that do not match the published checksum
    pub fn corrupted(mut self) -> Self {
        self.served = Some(self.content.iter().map(|b| b.wrapping_add(1)).collect());
        self
    }

    pub fn md5(&self) -> String {
        format!("{:x}", md5::compute(&self.content))
    }

    pub fn served_bytes(&self) -> &[u8] {
        self.served.as_deref().unwrap_or(&self.content)
    }
}

/// A purchased product
#[derive(Clone, Debug)]
pub struct RemoteProduct {
    pub id: String,
    pub name: String,
    pub publisher: Option<String>,
    pub files: Vec<RemoteFile>,
}

impl RemoteProduct {
    pub fn new(id: &str, name: &str, publisher: Option<&str>, files: Vec<RemoteFile>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            publisher: publisher.map(str::to_string),
            files,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "products_id": self.id,
            "products_name": self.name,
            "publishers_name": self.publisher,
            "files": self.files.iter().map(|f| serde_json::json!({
                "bundle_id": f.bundle_id,
                "filename": f.filename,
                "last_modified": REMOTE_MODIFIED,
                "raw_filesize": f.content.len(),
                "checksums": [
                    {"checksum": "0000stale0000", "checksum_date": "2020-01-01 00:00:00"},
                    {"checksum": f.md5(), "checksum_date": "2023-06-01 12:00:00"}
                ]
            })).collect::<Vec<_>>()
        })
    }
}

/// The sample library used by most tests
pub fn sample_catalog() -> Vec<RemoteProduct> {
    vec![
        RemoteProduct::new(
            "1",
            "Example Book",
            Some("Example Co"),
            vec![RemoteFile::new("101", "book.pdf", b"%PDF example book")],
        ),
        RemoteProduct::new(
            "2",
            "Maps: Volume 1",
            Some("Tom&#39;s Maps"),
            vec![
                RemoteFile::new("201", "maps.pdf", b"%PDF maps"),
                RemoteFile::new("202", "maps (print).pdf", b"%PDF maps for print"),
            ],
        ),
        RemoteProduct::new(
            "3",
            "Freebie",
            None,
            vec![RemoteFile::new("301", "free.pdf", b"%PDF free")],
        ),
    ]
}

/// Configuration for a test run against a mock storefront
pub fn test_config(library: &Path) -> Config {
    Config {
        token: "api-key".to_string(),
        library_path: library.to_path_buf(),
        threads: 3,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        file_task_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

/// Every regular file under `root`, relative and sorted
pub fn library_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Write a library file and backdate it
pub fn write_old_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
    let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(old)
        .unwrap();
}
