//! Engine-wide error taxonomy.
//!
//! # Design Decisions
//! - One enum for codec, routing, connection and registry failures
//! - Frame and header errors are connection-fatal, never retried
//! - Each variant knows the HTTP status or close code it maps to

use http::StatusCode;
use thiserror::Error;

use crate::websocket::close::CloseStatusCode;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A WebSocket frame violated RFC 6455.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame declared more payload than the configured maximum.
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooBig { len: u64, max: u64 },

    /// The stream ended before a declared field was fully read.
    #[error("truncated read: {0}")]
    TruncatedIo(&'static str),

    /// No request bytes arrived before the inactivity timer fired.
    #[error("request timed out")]
    Timeout,

    /// The request line and headers exceeded the input cap.
    #[error("headers too long")]
    HeadersTooLong,

    /// The request head or body is malformed or unsupported.
    #[error("{status}: {message}")]
    Request {
        status: StatusCode,
        message: &'static str,
    },

    /// No registered prefix matched the request.
    #[error("no handler registered for {0}")]
    RouteNotFound(String),

    /// Another handler already owns the prefix.
    #[error("the prefix {0} is already in use")]
    DuplicatePrefix(String),

    /// The prefix string is not `scheme://host[:port]/path/`.
    #[error("invalid prefix {prefix}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    /// The prefix path contains forbidden sequences.
    #[error("invalid prefix path {0}")]
    InvalidPrefixPath(String),

    /// A secure endpoint has neither a per-port nor an explicit certificate.
    #[error("no server certificate could be found for port {0}")]
    CertificateMissing(u16),

    /// Certificate material exists but could not be loaded.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// No session is registered under the id.
    #[error("session {0} could not be found")]
    SessionNotFound(String),

    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying socket or file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status sent before closing, when the error maps to one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Timeout => Some(StatusCode::REQUEST_TIMEOUT),
            Error::HeadersTooLong => Some(StatusCode::BAD_REQUEST),
            Error::Request { status, .. } => Some(*status),
            Error::RouteNotFound(_) => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }

    /// Close status reported to a WebSocket peer for codec failures.
    pub fn close_code(&self) -> CloseStatusCode {
        match self {
            Error::Protocol(_) => CloseStatusCode::ProtocolError,
            Error::PayloadTooBig { .. } => CloseStatusCode::TooBig,
            Error::TruncatedIo(_) | Error::Io(_) => CloseStatusCode::Abnormal,
            _ => CloseStatusCode::ServerError,
        }
    }

    /// Short text for the error page, when the error maps to a status.
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            Error::Timeout => Some("Request timed out"),
            Error::HeadersTooLong => Some("Headers too long"),
            Error::Request { message, .. } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn bad_request(message: &'static str) -> Self {
        Error::Request {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_http_statuses() {
        assert_eq!(Error::Timeout.status_code(), Some(StatusCode::REQUEST_TIMEOUT));
        assert_eq!(
            Error::RouteNotFound("/x/".into()).status_code(),
            Some(StatusCode::NOT_FOUND)
        );
        assert_eq!(Error::CertificateMissing(443).status_code(), None);
        let err = Error::Request {
            status: StatusCode::LENGTH_REQUIRED,
            message: "Length required",
        };
        assert_eq!(err.status_code(), Some(StatusCode::LENGTH_REQUIRED));
        assert_eq!(err.status_message(), Some("Length required"));
    }

    #[test]
    fn maps_close_codes() {
        assert_eq!(Error::protocol("bad").close_code(), CloseStatusCode::ProtocolError);
        assert_eq!(
            Error::PayloadTooBig { len: 10, max: 1 }.close_code(),
            CloseStatusCode::TooBig
        );
        assert_eq!(Error::TruncatedIo("header").close_code(), CloseStatusCode::Abnormal);
    }
}
