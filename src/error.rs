//! Error types for configuration, engine sockets and connection handles.
//!
//! [`ConfigError`] is returned synchronously from
//! [`crate::server::WebSocketServer::start`]. [`EngineError`] is what the
//! socket engine reports for a failed write or close. [`WsError`] is the
//! error surface of a [`crate::server::WebSocket`] handle.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Invalid server configuration. Fatal to the construction call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Port is missing or zero.
    #[error("port must be defined and greater than zero")]
    InvalidPort,

    /// Path is empty or does not start with `/`.
    #[error("path must be defined and start with '/': {0:?}")]
    InvalidPath(String),

    /// Negative payload limit (only reachable through the environment).
    #[error("max payload length must be >= 0, got {0}")]
    NegativeMaxPayload(i64),

    /// Only one of the TLS certificate/key pair was supplied.
    #[error("for TLS both the certificate and the key must be defined")]
    IncompleteTls,

    /// A TLS file does not exist on disk.
    #[error("{kind} file {} does not exist", path.display())]
    TlsFileMissing {
        /// Which half of the pair is missing (`"certificate"` or `"key"`).
        kind: &'static str,
        /// The configured path.
        path: PathBuf,
    },

    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv {
        /// Environment variable name.
        key: &'static str,
        /// Raw value found in the environment.
        value: String,
    },

    /// A required environment variable is not set.
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

/// Failure reported by the socket engine for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The socket has already been closed or aborted.
    #[error("invalid access of closed websocket")]
    Closed,

    /// A text frame was requested for a payload that is not UTF-8.
    #[error("text frame payload is not valid utf-8")]
    InvalidUtf8,

    /// Close reasons are limited to 123 bytes by the protocol.
    #[error("close reason is {0} bytes, the limit is 123")]
    CloseReasonTooLong(usize),
}

/// Error surface of a connection handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    /// The operation cannot be performed by this server.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The underlying engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Response returned when the verification gate refuses a handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeRejection;

impl IntoResponse for HandshakeRejection {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let reason = status.canonical_reason().unwrap_or("Unauthorized");
        (status, reason).into_response()
    }
}
