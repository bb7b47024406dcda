pub mod bucket_handlers;
pub mod connection_handlers;
pub mod health_handlers;
pub mod object_handlers;

use axum::Json;
use serde::Serialize;

/// `{ success: true, message }` envelope returned by mutating endpoints.
#[derive(Serialize, Debug)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

pub fn success(message: impl Into<String>) -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: true,
        message: message.into(),
    })
}
