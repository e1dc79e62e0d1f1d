use axum::{Json, http::StatusCode};
use serde::Serialize;

pub mod billing;
pub mod usage;

pub use billing::*;
pub use usage::*;

/// Standard error body: `{"error": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn json_error(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}
