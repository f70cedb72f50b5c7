//! Error bodies returned by the HTTP API

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResult {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
}

impl ErrorResult {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or_default().to_string(),
            message: message.into(),
        }
    }

    pub fn http_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
        HttpResponse::build(status).json(Self::new(status, message))
    }

    pub fn bad_request(message: impl Into<String>) -> HttpResponse {
        Self::http_response(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> HttpResponse {
        Self::http_response(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> HttpResponse {
        Self::http_response(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}
