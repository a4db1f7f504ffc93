//! Error types for the admission core

use thiserror::Error;

use crate::webhook::types::JSON_MIME;

#[derive(Error, Debug)]
pub enum Error {
    /// The request carried no body
    #[error("Empty body")]
    BodyEmpty,

    /// The request declared something other than exactly `application/json`
    #[error("Invalid content-type. Received: {received:?}, Expected: {:?}", JSON_MIME)]
    UnsupportedContentType { received: String },

    /// Neither the current nor the legacy review schema accepted the body
    #[error("Failed to decode admission review: {0}")]
    DecodeFailed(#[source] serde_json::Error),

    /// The review envelope decoded but had no request in it
    #[error("Admission review carries no request")]
    MissingRequest,

    /// No registered webhook owns the request path
    #[error("No webhook registered for path {0}")]
    NoMatchingHandler(String),

    /// The response envelope could not be serialized
    #[error("Failed to encode admission response: {0}")]
    EncodeFailed(#[source] serde_json::Error),

    /// A webhook was registered with an unusable path prefix
    #[error("Invalid webhook path {path:?}: {reason}")]
    InvalidWebhookPath { path: String, reason: &'static str },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Binding or serving the HTTP transport failed
    #[error("Transport error: {0}")]
    TransportFailed(String),
}

impl Error {
    /// HTTP status the transport should answer with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BodyEmpty | Error::DecodeFailed(_) | Error::MissingRequest => 400,
            Error::NoMatchingHandler(_) => 404,
            Error::UnsupportedContentType { .. } => 415,
            Error::EncodeFailed(_)
            | Error::InvalidWebhookPath { .. }
            | Error::ConfigError(_)
            | Error::TransportFailed(_) => 500,
        }
    }

    /// Short machine-readable label, used for logging and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Error::BodyEmpty => "body_empty",
            Error::UnsupportedContentType { .. } => "unsupported_content_type",
            Error::DecodeFailed(_) => "decode_failed",
            Error::MissingRequest => "missing_request",
            Error::NoMatchingHandler(_) => "no_matching_handler",
            Error::EncodeFailed(_) => "encode_failed",
            Error::InvalidWebhookPath { .. } => "invalid_webhook_path",
            Error::ConfigError(_) => "config",
            Error::TransportFailed(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
