//! Unified error type.

use std::fmt;

use http::{Method, StatusCode};

use crate::response::{IntoReply, Reply};

/// The error type returned by franz's fallible operations.
///
/// Startup errors (`Connection`, `ProducerInit`, `RouteConflict`,
/// `InvalidRoute`, `Config`) are fatal to the process. Everything else is
/// scoped to one request and becomes an HTTP reply through [`IntoReply`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("producer init failed: {0}")]
    ProducerInit(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryFailure),

    #[error("route conflict: {method} {pattern} is already registered")]
    RouteConflict { method: Method, pattern: String },

    #[error("invalid route `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("malformed request body: {0}")]
    Decode(String),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("producer is closed")]
    Closed,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("producer queue is full")]
    QueueFull,

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("store: {0}")]
    Store(String),

    #[error("telemetry: {0}")]
    Telemetry(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl Error {
    /// HTTP status a per-request error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Closed | Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoReply for Error {
    fn into_reply(self) -> Reply {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        }
        Reply::json(status, &serde_json::json!({ "error": self.to_string() }))
    }
}

/// A specific message that could not be handed off to the broker.
///
/// Returned to the caller in synchronous mode and reported through the
/// error drain in asynchronous mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub topic: String,
    pub reason: String,
    /// Whether a later attempt may succeed (queue full, leader election, ...).
    pub retriable: bool,
}

impl DeliveryFailure {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { topic: topic.into(), reason: reason.into(), retriable: false }
    }

    pub fn retriable(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { retriable: true, ..Self::new(topic, reason) }
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery to `{}` failed: {}", self.topic, self.reason)
    }
}

impl std::error::Error for DeliveryFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_client_and_gateway_statuses() {
        assert_eq!(Error::Decode("eof".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Delivery(DeliveryFailure::new("chat", "broker down")).status(),
            StatusCode::BAD_GATEWAY,
        );
        assert_eq!(Error::Closed.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::DeadlineExceeded.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(Error::Store("down".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_reply_carries_message() {
        let reply = Error::Decode("expected value".into()).into_reply();
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
        let body = reply.into_body().into_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "malformed request body: expected value");
    }
}
