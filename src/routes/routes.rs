//! Defines the JSON API consumed by the explorer UI.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Connections**
//!   - `GET    /api/connections`: list profiles (no secrets)
//!   - `POST   /api/connections`: create profile
//!   - `POST   /api/connections/test`: try an unsaved config
//!   - `PUT    /api/connections/{id}`: update profile
//!   - `DELETE /api/connections/{id}`: delete profile
//!   - `POST   /api/connections/{id}/activate`: make it the active profile
//!
//! - **Buckets**
//!   - `GET    /api/buckets`: list buckets
//!   - `POST   /api/buckets`: create bucket
//!   - `DELETE /api/buckets/{name}`: empty, then delete bucket
//!
//! - **Objects**
//!   - `GET    /api/objects/{bucket}?prefix=`: folder/file listing
//!   - `DELETE /api/objects/{bucket}?key=&isFolder=`: delete file or folder
//!   - `GET    /api/objects/{bucket}/download?key=`: presigned URL
//!   - `GET    /api/objects/{bucket}/metadata?key=`: HEAD metadata
//!   - `GET    /api/objects/{bucket}/stream?key=`: proxied bytes
//!   - `POST   /api/objects/{bucket}/upload`: multipart form upload
//!   - `POST   /api/objects/{bucket}/folder`: create folder marker
//!   - `PUT    /api/objects/{bucket}/rename`: rename/move
//!   - `POST   /api/objects/{bucket}/copy`: copy
//!   - `POST   /api/objects/{bucket}/batch-delete`: isolated multi-delete

use crate::{
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, list_buckets},
        connection_handlers::{
            activate_connection, create_connection, delete_connection, list_connections,
            test_connection, update_connection,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{
            batch_delete, copy_object, create_folder, delete_object, download_url, list_objects,
            object_metadata, rename_object, stream_object, upload_objects,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Build the router for every API route. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Connection profiles
        .route(
            "/api/connections",
            get(list_connections).post(create_connection),
        )
        .route("/api/connections/test", post(test_connection))
        .route(
            "/api/connections/{id}",
            put(update_connection).delete(delete_connection),
        )
        .route("/api/connections/{id}/activate", post(activate_connection))
        // Buckets
        .route("/api/buckets", get(list_buckets).post(create_bucket))
        .route("/api/buckets/{name}", delete(delete_bucket))
        // Objects
        .route(
            "/api/objects/{bucket}",
            get(list_objects).delete(delete_object),
        )
        .route("/api/objects/{bucket}/download", get(download_url))
        .route("/api/objects/{bucket}/metadata", get(object_metadata))
        .route("/api/objects/{bucket}/stream", get(stream_object))
        .route("/api/objects/{bucket}/upload", post(upload_objects))
        .route("/api/objects/{bucket}/folder", post(create_folder))
        .route("/api/objects/{bucket}/rename", put(rename_object))
        .route("/api/objects/{bucket}/copy", post(copy_object))
        .route("/api/objects/{bucket}/batch-delete", post(batch_delete))
}

/// The complete application: routes, state, and the upload body limit.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
