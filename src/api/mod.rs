//! HTTP catalog client for the DriveThruRPG v1 API.
//!
//! [`DrpgClient`] exchanges the user's API key for an access token, pages
//! through the customer's products, asks the storefront to prepare download
//! links and streams file bodies. Every failure is mapped onto
//! [`CatalogError`] so the sync engine can tell fatal, transient and
//! permanent failures apart.

mod wire;


use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::catalog::{ByteStream, Catalog};
use crate::config::Config;
use crate::error::{CatalogError, Error, Result};
use crate::types::{FileId, Product, ProductId};

use wire::{Envelope, FileTaskMessage, TokenMessage, WireProduct};

/// Public storefront endpoint
pub const DEFAULT_BASE_URL: &str = "https://www.drivethrurpg.com";

const PRODUCT_FIELDS: &str = "publishers_name,products_name";
const PRODUCT_EMBED: &str = "files.filename,files.last_modified,files.checksums,files.raw_filesize";
const FILE_TASK_FIELDS: &str = "download_url,progress";

/// Connect timeout for file downloads; body stalls are policed by the worker
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct Session {
    customer_id: String,
    access_token: String,
}

/// reqwest-backed [`Catalog`]
pub struct DrpgClient {
    http: reqwest::Client,
    download_http: reqwest::Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<Session>>,
    per_page: u32,
    poll_interval: Duration,
}

impl std::fmt::Debug for DrpgClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrpgClient")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl DrpgClient {
    /// Client for the public storefront
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Client for a storefront at `base_url`
    ///
    /// # Errors
    /// Returns error if `base_url` is not a valid URL or the HTTP client cannot be created
    pub fn with_base_url(config: &Config, base_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url).map_err(|e| Error::Config {
            message: format!("invalid catalog URL '{base_url}': {e}"),
            key: Some("base_url".to_string()),
        })?;

        let user_agent = concat!("drpg/", env!("CARGO_PKG_VERSION"));
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.catalog_request)
            .user_agent(user_agent)
            .build()?;
        let download_http = reqwest::Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            http,
            download_http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: config.token.clone(),
            session: RwLock::new(None),
            per_page: config.products_per_page.max(1),
            poll_interval: config.file_task_poll_interval,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange the API key for an access token and remember the customer id
    pub async fn authenticate(&self) -> std::result::Result<(), CatalogError> {
        self.refresh_session().await.map(|_| ())
    }

    async fn refresh_session(&self) -> std::result::Result<Session, CatalogError> {
        tracing::info!("Authenticating");
        let response = self
            .http
            .post(self.endpoint("/api/v1/token"))
            .query(&[("fields", "customers_id")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let token: TokenMessage = read_message(response, "token").await?;

        let session = Session {
            customer_id: token.customers_id,
            access_token: token.access_token,
        };
        *self.session.write().await = Some(session.clone());
        tracing::debug!(customer_id = %session.customer_id, "Authenticated");
        Ok(session)
    }

    async fn session(&self) -> std::result::Result<Session, CatalogError> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.refresh_session().await
    }

    /// Send an authenticated request, re-authenticating once if the access token expired
    async fn send_authorized<F>(&self, build: F) -> std::result::Result<reqwest::Response, CatalogError>
    where
        F: Fn(&reqwest::Client, &Session) -> reqwest::RequestBuilder,
    {
        let session = self.session().await?;
        let response = build(&self.http, &session).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        tracing::info!("Access token rejected, re-authenticating");
        let session = self.refresh_session().await?;
        Ok(build(&self.http, &session).send().await?)
    }

    async fn product_page(&self, page: u32) -> std::result::Result<Vec<Product>, CatalogError> {
        let response = self
            .send_authorized(|http, session| {
                http.get(self.endpoint(&format!(
                    "/api/v1/customers/{}/products",
                    session.customer_id
                )))
                .bearer_auth(&session.access_token)
                .query(&[
                    ("page", page.to_string()),
                    ("per_page", self.per_page.to_string()),
                    ("include_archived", "0".to_string()),
                    ("fields", PRODUCT_FIELDS.to_string()),
                    ("embed", PRODUCT_EMBED.to_string()),
                ])
            })
            .await?;
        let entries: Vec<serde_json::Value> = read_message(response, "product list").await?;

        let mut products = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<WireProduct>(entry) {
                Ok(product) => products.push(Product::from(product)),
                Err(e) => tracing::warn!(page, error = %e, "Skipping unreadable product entry"),
            }
        }
        Ok(products)
    }

    async fn file_task(
        &self,
        task_id: Option<&str>,
        product_id: &ProductId,
        file_id: &FileId,
    ) -> std::result::Result<FileTaskMessage, CatalogError> {
        let response = self
            .send_authorized(|http, session| {
                let request = match task_id {
                    Some(id) => http.get(self.endpoint(&format!("/api/v1/file_tasks/{id}"))),
                    None => http.post(self.endpoint("/api/v1/file_tasks")).form(&[
                        ("products_id", product_id.as_str()),
                        ("bundle_id", file_id.as_str()),
                    ]),
                };
                request
                    .query(&[("fields", FILE_TASK_FIELDS)])
                    .bearer_auth(&session.access_token)
            })
            .await?;
        read_message(response, "file task").await
    }
}

/// Check the status and decode the `message` payload
async fn read_message<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> std::result::Result<T, CatalogError> {
    let status = response.status();
    if !status.is_success() {
        return Err(CatalogError::from_status(status, context));
    }
    let body = response.bytes().await?;
    serde_json::from_slice::<Envelope<T>>(&body)
        .map(|envelope| envelope.message)
        .map_err(|e| CatalogError::Malformed(format!("{context}: {e}")))
}

#[async_trait::async_trait]
impl Catalog for DrpgClient {
    async fn list_products(&self) -> std::result::Result<Vec<Product>, CatalogError> {
        tracing::info!("Fetching products list");
        let mut products = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.product_page(page).await?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(page, count = batch.len(), "Fetched products page");
            products.extend(batch);
            page += 1;
        }
        Ok(products)
    }

    async fn get_download_url(
        &self,
        product_id: &ProductId,
        file_id: &FileId,
    ) -> std::result::Result<String, CatalogError> {
        let mut task = self.file_task(None, product_id, file_id).await?;
        while task.progress.starts_with("Preparing") {
            tracing::debug!(product = %product_id, file = %file_id, "Waiting for download link");
            tokio::time::sleep(self.poll_interval).await;
            task = self
                .file_task(Some(&task.file_tasks_id), product_id, file_id)
                .await?;
        }
        tracing::debug!(product = %product_id, file = %file_id, "Got download link");
        Ok(task.download_url)
    }

    async fn download(&self, url: &str) -> std::result::Result<ByteStream, CatalogError> {
        let response = self.download_http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::from_status(status, "file download"));
        }
        Ok(ByteStream {
            declared_size: response.content_length(),
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(CatalogError::from))
                .boxed(),
        })
    }
}
