//! Error types for the Stofware client.
//!
//! # Design
//! Every non-2xx response lands in `Http` with the raw status code and body,
//! so callers can inspect whatever the server sent. Transport failures and
//! body decoding failures get their own variants.

use thiserror::Error;

/// Errors returned by `StofwareClient` and its resource accessors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A successful response body was not valid JSON.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload or query parameters could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// JSON text supplied by the caller was malformed or had the wrong shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status code, if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body of a non-2xx response.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
