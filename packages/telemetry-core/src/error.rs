//! Centralized error types for the telemetry plane.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the telemetry plane.
///
/// Mirrors the error taxonomy every component reports through: a client
/// mistake, an auth failure talking to a downstream system, a transient or
/// fatal upstream failure, a decode failure, or something unexpected.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TelemetryError {
    /// The caller sent a malformed or invalid request.
    #[error("Invalid request: {0}")]
    ClientError(String),

    /// Authentication or authorization with an upstream system failed.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// An upstream dependency failed in a way that is likely to succeed on retry.
    #[error("Upstream temporarily unavailable: {0}")]
    UpstreamTransient(String),

    /// An upstream dependency failed in a way that retrying will not fix.
    #[error("Upstream request failed: {0}")]
    UpstreamFatal(String),

    /// Payload bytes could not be decoded (audio codec, framing, JSON).
    #[error("Failed to decode payload: {0}")]
    DecodeError(String),

    /// The requested call, stream, or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Something failed that indicates a bug or an unrecoverable local condition.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TelemetryError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClientError(_) => "client_error",
            Self::AuthError(_) => "auth_error",
            Self::UpstreamTransient(_) => "upstream_transient",
            Self::UpstreamFatal(_) => "upstream_fatal",
            Self::DecodeError(_) => "decode_error",
            Self::NotFound(_) => "not_found",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientError(_) | Self::DecodeError(_) => StatusCode::BAD_REQUEST,
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamFatal(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for TelemetryError {
    fn code(&self) -> &'static str {
        self.code()
    }
}

/// Convenient Result alias for application-wide operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::UpstreamTransient(err.to_string())
        } else {
            Self::UpstreamFatal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}
