//! Mock DriveThruRPG storefront built on wiremock

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::RemoteProduct;

pub const CUSTOMER_ID: u32 = 4242;

/// A running mock storefront
pub struct Storefront {
    pub server: MockServer,
}

impl Storefront {
    /// Serve `products` on the first page; the second page is empty
    pub async fn start(products: &[RemoteProduct]) -> Self {
        let server = MockServer::start().await;
        mount_token(&server, 200).await;

        let page: Vec<_> = products.iter().map(RemoteProduct::to_json).collect();
        let products_path = format!("/api/v1/customers/{CUSTOMER_ID}/products");
        Mock::given(method("GET"))
            .and(path(products_path.as_str()))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": page})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(products_path.as_str()))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": []})))
            .mount(&server)
            .await;

        for product in products {
            for file in &product.files {
                let task_id = format!("9{}", file.bundle_id);
                let download_url = format!("{}/files/{}", server.uri(), file.bundle_id);
                // The first request finds the file still being prepared
                Mock::given(method("POST"))
                    .and(path("/api/v1/file_tasks"))
                    .and(body_string_contains(format!("bundle_id={}", file.bundle_id)))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "message": {
                            "file_tasks_id": task_id,
                            "progress": "Preparing download...",
                            "download_url": ""
                        }
                    })))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(path(format!("/api/v1/file_tasks/{task_id}")))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "message": {
                            "file_tasks_id": task_id,
                            "progress": "Complete",
                            "download_url": download_url
                        }
                    })))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(path(format!("/files/{}", file.bundle_id)))
                    .respond_with(
                        ResponseTemplate::new(200).set_body_bytes(file.served_bytes().to_vec()),
                    )
                    .mount(&server)
                    .await;
            }
        }

        Self { server }
    }

    /// A storefront that rejects the API key
    pub async fn rejecting_token() -> Self {
        let server = MockServer::start().await;
        mount_token(&server, 401).await;
        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Number of received requests matching `verb` and a path prefix
    pub async fn requests(&self, verb: &str, path_prefix: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == verb && r.url.path().starts_with(path_prefix))
            .count()
    }

    /// File body downloads
    pub async fn downloads(&self) -> usize {
        self.requests("GET", "/files/").await
    }

    /// Download URL requests
    pub async fn file_tasks(&self) -> usize {
        self.requests("POST", "/api/v1/file_tasks").await
    }
}

async fn mount_token(server: &MockServer, status: u16) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "message": {"customers_id": CUSTOMER_ID, "access_token": "session-token"}
        }))
    } else {
        ResponseTemplate::new(status)
    };
    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(response)
        .mount(server)
        .await;
}
