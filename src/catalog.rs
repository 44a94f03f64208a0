//! Remote catalog collaborator
//!
//! The sync engine only needs three capabilities from the storefront: list the
//! purchased products, turn a file into a short-lived download URL, and stream
//! the bytes behind that URL. [`crate::api::DrpgClient`] implements them over
//! HTTP; tests use an in-memory fake.

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::CatalogError;
use crate::types::{FileId, Product, ProductId};

/// Body of a file download
pub struct ByteStream {
    /// Size announced by the server, if any
    pub declared_size: Option<u64>,
    /// Chunks of the body in order
    pub chunks: BoxStream<'static, Result<Bytes, CatalogError>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

/// Abstraction over the storefront API, enabling testability.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// All purchased, non-archived products with their files
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError>;

    /// A short-lived, single-use URL for one file
    async fn get_download_url(
        &self,
        product_id: &ProductId,
        file_id: &FileId,
    ) -> Result<String, CatalogError>;

    /// Stream the bytes behind a download URL
    async fn download(&self, url: &str) -> Result<ByteStream, CatalogError>;
}
