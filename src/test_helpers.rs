//! Shared test helpers: catalog fixtures and a scriptable in-memory catalog.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::catalog::{ByteStream, Catalog};
use crate::error::CatalogError;
use crate::types::{Checksum, FileId, FileMetadata, Product, ProductId};

pub(crate) fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// A file entry whose checksum matches `content`
pub(crate) fn file_with_content(
    id: &str,
    filename: &str,
    last_modified: DateTime<Utc>,
    content: &[u8],
) -> FileMetadata {
    FileMetadata {
        id: FileId::new(id),
        filename: filename.to_string(),
        checksum: Some(Checksum::md5(md5_hex(content))),
        last_modified: Some(last_modified),
        size_bytes: Some(content.len() as u64),
    }
}

pub(crate) fn product(id: &str, name: &str, publisher: &str, files: Vec<FileMetadata>) -> Product {
    Product {
        id: ProductId::new(id),
        name: name.to_string(),
        publisher: publisher.to_string(),
        files,
    }
}

/// Write `content` at `path` (creating parents) and set its mtime
pub(crate) fn write_local(path: &Path, content: &[u8], mtime: DateTime<Utc>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(mtime)).unwrap();
}

/// Every regular file under `root`, relative and sorted
pub(crate) fn list_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Scripted failure for a file download
#[derive(Clone, Debug)]
pub(crate) enum DownloadFailure {
    /// `download()` itself fails
    Error(CatalogError),
    /// The body stops with a connection error after `after` bytes
    Truncate { after: usize },
    /// The body is delivered with different bytes
    Corrupt,
}

/// Counts concurrent downloads and remembers the peak
#[derive(Debug, Default)]
pub(crate) struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<InFlightGauge>);

impl InFlightGuard {
    fn enter(gauge: &Arc<InFlightGauge>) -> Self {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`Catalog`] with scripted failures and call counters.
///
/// Download URLs are `fake://<file id>`.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    products: Vec<Product>,
    contents: HashMap<String, Vec<u8>>,
    list_failures: std::sync::Mutex<VecDeque<CatalogError>>,
    url_failures: std::sync::Mutex<HashMap<String, VecDeque<CatalogError>>>,
    download_failures: std::sync::Mutex<HashMap<String, VecDeque<DownloadFailure>>>,
    latency: Duration,
    chunk_size: usize,
    pub(crate) list_calls: AtomicUsize,
    pub(crate) url_calls: AtomicUsize,
    pub(crate) download_calls: AtomicUsize,
    pub(crate) gauge: Arc<InFlightGauge>,
}

impl FakeCatalog {
    pub(crate) fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            chunk_size: 4,
            ..Self::default()
        }
    }

    pub(crate) fn with_content(mut self, file_id: &str, content: &[u8]) -> Self {
        self.contents.insert(file_id.to_string(), content.to_vec());
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn fail_listing(self, error: CatalogError) -> Self {
        self.list_failures.lock().unwrap().push_back(error);
        self
    }

    pub(crate) fn fail_url(self, file_id: &str, error: CatalogError) -> Self {
        self.url_failures
            .lock()
            .unwrap()
            .entry(file_id.to_string())
            .or_default()
            .push_back(error);
        self
    }

    pub(crate) fn fail_download(self, file_id: &str, failure: DownloadFailure) -> Self {
        self.download_failures
            .lock()
            .unwrap()
            .entry(file_id.to_string())
            .or_default()
            .push_back(failure);
        self
    }

    pub(crate) fn network_calls(&self) -> usize {
        self.url_calls.load(Ordering::SeqCst) + self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Catalog for FakeCatalog {
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.products.clone())
    }

    async fn get_download_url(
        &self,
        _product_id: &ProductId,
        file_id: &FileId,
    ) -> Result<String, CatalogError> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .url_failures
            .lock()
            .unwrap()
            .get_mut(file_id.as_str())
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => Err(error),
            None => Ok(format!("fake://{file_id}")),
        }
    }

    async fn download(&self, url: &str) -> Result<ByteStream, CatalogError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard::enter(&self.gauge);

        let file_id = url.trim_start_matches("fake://").to_string();
        let Some(content) = self.contents.get(&file_id).cloned() else {
            return Err(CatalogError::NotFound(url.to_string()));
        };
        let failure = self
            .download_failures
            .lock()
            .unwrap()
            .get_mut(&file_id)
            .and_then(VecDeque::pop_front);

        let (body, tail_error) = match failure {
            Some(DownloadFailure::Error(e)) => return Err(e),
            Some(DownloadFailure::Truncate { after }) => (
                content[..after.min(content.len())].to_vec(),
                Some(CatalogError::Transient("connection reset".into())),
            ),
            Some(DownloadFailure::Corrupt) => {
                (content.iter().map(|b| b.wrapping_add(1)).collect(), None)
            }
            None => (content.clone(), None),
        };

        let latency = self.latency;
        let chunks: Vec<Result<Bytes, CatalogError>> = body
            .chunks(self.chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .chain(tail_error.map(Err))
            .collect();

        // The guard lives as long as the body stream
        let body_stream = stream::once(async move {
            tokio::time::sleep(latency).await;
            stream::iter(chunks)
        })
        .flatten()
        .chain(stream::once(async move {
            drop(guard);
            Ok(Bytes::new())
        }))
        .filter(|chunk| std::future::ready(!matches!(chunk, Ok(b) if b.is_empty())));

        Ok(ByteStream {
            declared_size: Some(content.len() as u64),
            chunks: body_stream.boxed(),
        })
    }
}
