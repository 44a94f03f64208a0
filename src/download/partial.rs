//! Temporary download files.
//!
//! Bytes are written next to the final target under a hidden `.drpg-*.part`
//! name and renamed over the target only once the download is complete and
//! verified. The guard removes the temporary file when dropped uncommitted.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

const PARTIAL_PREFIX: &str = ".drpg-";
const PARTIAL_SUFFIX: &str = ".part";
/// Bytes of the target name kept in the temporary name, leaving room for the decorations
const MAX_STEM_BYTES: usize = 128;

/// Whether a file name belongs to an in-progress or abandoned download
pub(crate) fn is_partial_file(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

/// Temporary file for one download attempt
pub(crate) struct PartialFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

impl PartialFile {
    /// Create a fresh temporary file in the target's directory.
    ///
    /// The parent directory must already exist.
    pub(crate) async fn create(target: &Path) -> std::io::Result<Self> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = truncate_at_char_boundary(&name, MAX_STEM_BYTES);
        let path = dir.join(format!(
            "{PARTIAL_PREFIX}{stem}.{:08x}{PARTIAL_SUFFIX}",
            rand::random::<u32>()
        ));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes).await,
            None => Err(std::io::Error::other("partial file already closed")),
        }
    }

    /// Flush to disk and atomically rename over `target`
    pub(crate) async fn commit(mut self, target: &Path) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

/// Longest prefix of `s` of at most `max` bytes
fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close before unlinking so removal also works on Windows
        drop(self.file.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}
