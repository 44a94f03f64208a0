//! Storefront response shapes and their mapping to domain types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::naming::UNKNOWN_PUBLISHER;
use crate::types::{Checksum, FileId, FileMetadata, Product, ProductId};

/// Every response wraps its payload in `message`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) message: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenMessage {
    #[serde(deserialize_with = "id_string")]
    pub(crate) customers_id: String,
    pub(crate) access_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileTaskMessage {
    #[serde(deserialize_with = "id_string")]
    pub(crate) file_tasks_id: String,
    pub(crate) progress: String,
    pub(crate) download_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireProduct {
    #[serde(deserialize_with = "id_string")]
    pub(crate) products_id: String,
    #[serde(default)]
    pub(crate) products_name: String,
    #[serde(default)]
    pub(crate) publishers_name: Option<String>,
    /// Decoded one by one so a malformed file cannot hide its siblings
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) files: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFile {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub(crate) bundle_id: Option<String>,
    #[serde(default)]
    pub(crate) filename: Option<String>,
    #[serde(default)]
    pub(crate) last_modified: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) checksums: Vec<WireChecksum>,
    #[serde(default, deserialize_with = "opt_size")]
    pub(crate) raw_filesize: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChecksum {
    #[serde(default)]
    pub(crate) checksum: Option<String>,
    #[serde(default)]
    pub(crate) checksum_date: Option<String>,
}

impl From<WireProduct> for Product {
    fn from(wire: WireProduct) -> Self {
        let publisher = wire
            .publishers_name
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_PUBLISHER.to_string());
        let files = wire
            .files
            .into_iter()
            .map(|entry| match serde_json::from_value::<WireFile>(entry) {
                Ok(file) => FileMetadata::from(file),
                Err(e) => {
                    tracing::warn!(
                        product = %wire.products_id,
                        error = %e,
                        "Unreadable file entry"
                    );
                    // Empty id and name: the planner records it as malformed
                    FileMetadata {
                        id: FileId::new(""),
                        filename: String::new(),
                        checksum: None,
                        last_modified: None,
                        size_bytes: None,
                    }
                }
            })
            .collect();
        Product {
            id: ProductId::new(wire.products_id),
            name: wire.products_name,
            publisher,
            files,
        }
    }
}

impl From<WireFile> for FileMetadata {
    fn from(wire: WireFile) -> Self {
        FileMetadata {
            id: FileId::new(wire.bundle_id.unwrap_or_default()),
            filename: wire.filename.unwrap_or_default(),
            checksum: newest_checksum(&wire.checksums).map(Checksum::md5),
            last_modified: wire.last_modified.as_deref().and_then(parse_timestamp),
            size_bytes: wire.raw_filesize,
        }
    }
}

/// The most recently published digest; undated entries lose to dated ones
pub(crate) fn newest_checksum(checksums: &[WireChecksum]) -> Option<String> {
    checksums
        .iter()
        .filter_map(|c| {
            let digest = c.checksum.as_deref()?.trim();
            (!digest.is_empty()).then_some((digest, c))
        })
        .max_by_key(|(_, c)| c.checksum_date.as_deref().and_then(parse_timestamp))
        .map(|(digest, _)| digest.to_ascii_lowercase())
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// The storefront sends identifiers as numbers or strings
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number identifier, got {other}"
        ))),
    }
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `null` reads as an empty value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn opt_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
