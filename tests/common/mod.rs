//! Shared harness: the full router over a `MemoryBackend` and an in-memory
//! SQLite credential store.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use bucket_explorer::{
    AppState, db,
    models::connection::ConnectionInput,
    routes,
    services::{
        credential_store::CredentialStore,
        crypto::SecretCipher,
        memory_backend::{MemoryBackend, MemoryBackendFactory},
        upload::UploadSettings,
    },
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

pub const BOUNDARY: &str = "explorer-test-boundary";

/// Small thresholds so multipart paths run on tiny payloads.
pub const TEST_SETTINGS: UploadSettings = UploadSettings {
    multipart_threshold: 64,
    part_size: 16,
    part_concurrency: 3,
};

pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub state: AppState,
}

/// Initialize tracing for tests (call once)
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("bucket_explorer=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// App with no connection profile stored.
pub async fn spawn_app() -> TestApp {
    init_tracing();
    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let store = CredentialStore::new(Arc::new(pool), Arc::new(SecretCipher::generate()));

    let backend = Arc::new(MemoryBackend::new());
    let factory = Arc::new(MemoryBackendFactory::new(backend.clone()));
    let state = AppState::new(store, factory, TEST_SETTINGS);
    let router = routes::app(state.clone(), 16 * 1024 * 1024);

    TestApp {
        router,
        backend,
        state,
    }
}

/// App with one (active) connection profile and an empty `demo` bucket.
pub async fn connected_app() -> TestApp {
    let app = spawn_app().await;
    app.state.store.create(local_input("local")).await.unwrap();
    app.backend.seed("demo", &[]);
    app
}

pub fn local_input(name: &str) -> ConnectionInput {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "endpoint": "http://localhost:9000",
        "accessKey": "minioadmin",
        "secretKey": "minioadmin-secret",
    }))
    .unwrap()
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a JSON request and decode the JSON response (`Null` when empty).
    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.json(Method::GET, uri, None).await
    }

    /// POST a multipart form built from `(name, filename, content)` parts.
    pub async fn upload(&self, uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let response = self.send(request).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}
