//! Checksum verification
//!
//! Digests are computed incrementally while bytes stream past, so a file is
//! never buffered whole. The algorithm comes from the catalog entry rather than
//! being fixed, and an algorithm we do not know yields [`Verification::Skipped`].

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::types::Checksum;

/// Read buffer for hashing local files
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5, what the storefront publishes
    Md5,
    /// SHA-256
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parse a catalog algorithm identifier; `None` if unsupported
    pub fn from_identifier(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Some(ChecksumAlgorithm::Md5),
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Outcome of a verification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Digest matches the expected value
    Match,
    /// Digest differs
    Mismatch {
        /// Expected digest
        expected: String,
        /// Computed digest
        actual: String,
    },
    /// No expected checksum, unknown algorithm, or verification disabled
    Skipped,
}

impl Verification {
    /// `true` unless the digest was computed and differs
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, Verification::Mismatch { .. })
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(bytes),
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// In-progress verification of a byte stream
pub struct StreamingCheck {
    state: Option<(Hasher, String)>,
}

impl StreamingCheck {
    fn skipped() -> Self {
        Self { state: None }
    }

    /// Feed the next chunk
    pub fn update(&mut self, bytes: &[u8]) {
        if let Some((hasher, _)) = self.state.as_mut() {
            hasher.update(bytes);
        }
    }

    /// Whether a digest is being computed
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Compare the accumulated digest with the expected one
    pub fn finish(self) -> Verification {
        match self.state {
            None => Verification::Skipped,
            Some((hasher, expected)) => {
                let actual = hasher.finalize_hex();
                if actual.eq_ignore_ascii_case(&expected) {
                    Verification::Match
                } else {
                    Verification::Mismatch { expected, actual }
                }
            }
        }
    }
}

/// Verifies bytes against catalog checksums
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChecksumValidator {
    enabled: bool,
}

impl ChecksumValidator {
    /// Create a validator; a disabled one skips every check
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether checks are performed
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start verifying a stream against `expected`
    pub fn begin(&self, expected: Option<&Checksum>) -> StreamingCheck {
        if !self.enabled {
            return StreamingCheck::skipped();
        }
        let Some(expected) = expected else {
            return StreamingCheck::skipped();
        };
        match ChecksumAlgorithm::from_identifier(&expected.algorithm) {
            Some(algorithm) => StreamingCheck {
                state: Some((Hasher::new(algorithm), expected.digest.trim().to_string())),
            },
            None => {
                tracing::warn!(
                    algorithm = %expected.algorithm,
                    "Unsupported checksum algorithm, skipping verification"
                );
                StreamingCheck::skipped()
            }
        }
    }

    /// Verify an in-memory buffer
    pub fn verify_bytes(&self, bytes: &[u8], expected: Option<&Checksum>) -> Verification {
        let mut check = self.begin(expected);
        check.update(bytes);
        check.finish()
    }

    /// Verify a file on disk, reading it in fixed-size chunks
    pub async fn verify_file(
        &self,
        path: &Path,
        expected: Option<&Checksum>,
    ) -> std::io::Result<Verification> {
        let mut check = self.begin(expected);
        if !check.is_active() {
            return Ok(Verification::Skipped);
        }

        let mut file = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            check.update(&buffer[..read]);
        }
        Ok(check.finish())
    }
}
