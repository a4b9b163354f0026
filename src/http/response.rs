//! Structured JSON responses.
//!
//! # Responsibilities
//! - Define the error body shared by service-level failures
//! - Serialize bodies with `Content-Type: application/json`
//!
//! # Design Decisions
//! - Optional fields are omitted rather than sent empty
//! - Serialization failure degrades to a bare 500 instead of panicking

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde::Serialize;

/// Error code used for recovered handler panics.
pub const RECOVER_ERROR_CODE: &str = "recover_error";

/// Error title used for recovered handler panics.
pub const RECOVER_ERROR_TITLE: &str = "recover";

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    /// Body for a fault contained by the recovery layer.
    pub fn recovered(trace: impl Into<String>) -> Self {
        Self {
            code: RECOVER_ERROR_CODE.to_string(),
            title: RECOVER_ERROR_TITLE.to_string(),
            trace: Some(trace.into()),
            message: None,
        }
    }
}

/// Build a response carrying `data` as JSON.
pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response {
    match serde_json::to_vec(data) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize JSON response");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
