//! Error types for the Kinetic client
//!
//! Provides a unified error type for all operations.
//!
//! The error is `Clone` so a single transport fault can be handed to every
//! request that was outstanding on the connection when it failed.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::StatusCode;

/// Result type alias using KineticError
pub type Result<T> = std::result::Result<T, KineticError>;

/// Unified error type for Kinetic client operations
#[derive(Debug, Clone, Error)]
pub enum KineticError {
    // -------------------------------------------------------------------------
    // Client-side Validation Errors (raised before any I/O)
    // -------------------------------------------------------------------------
    #[error("Key exceeds maximum size of {max} bytes (got {len})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value exceeds maximum size of {max} bytes (got {len})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("This operation requires a pin")]
    PinRequired,

    #[error("This operation requires a TLS connection")]
    TlsRequired,

    // -------------------------------------------------------------------------
    // Transport Errors (fatal, fault the connection)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Server disconnected: {0}")]
    ServerDisconnected(String),

    #[error("Invalid magic value: 0x{0:02x}")]
    InvalidMagic(u8),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    // -------------------------------------------------------------------------
    // Authentication Errors (fatal)
    // -------------------------------------------------------------------------
    #[error("Authentication failed: {0}")]
    Authentication(String),

    // -------------------------------------------------------------------------
    // Protocol Status Errors (request-level, connection survives)
    // -------------------------------------------------------------------------
    #[error("{}{}", .code.name(), message_suffix(.message))]
    Status { code: StatusCode, message: String },

    #[error("Cluster version mismatch, device is at version {actual}")]
    ClusterVersionMismatch { actual: i64, message: String },

    #[error("Batch aborted: {message}")]
    BatchAborted {
        failed_operation: Option<u64>,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Batch State Errors
    // -------------------------------------------------------------------------
    #[error("batch completed. no more operations are permitted within this batch.")]
    BatchCompleted,

    // -------------------------------------------------------------------------
    // Connection State Errors
    // -------------------------------------------------------------------------
    #[error("Not connected")]
    NotConnected,

    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Connection faulted: {0}")]
    ConnectionFaulted(Box<KineticError>),

    #[error("Connection closed by client")]
    ConnectionClosed,

    /// A completion tried to block on the I/O thread that must deliver the
    /// result it waits for
    #[error("Blocking wait inside a completion running on the connection's I/O thread")]
    BlockingInCompletion,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

impl From<std::io::Error> for KineticError {
    fn from(err: std::io::Error) -> Self {
        KineticError::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for KineticError {
    fn from(err: bincode::Error) -> Self {
        KineticError::Serialization(err.to_string())
    }
}

impl KineticError {
    /// Whether this error takes the connection down.
    ///
    /// Transport, authentication and protocol-anomaly errors are fatal.
    /// Status errors, validation errors and state errors are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KineticError::Io(_)
                | KineticError::ServerDisconnected(_)
                | KineticError::InvalidMagic(_)
                | KineticError::Frame(_)
                | KineticError::Serialization(_)
                | KineticError::Tls(_)
                | KineticError::Handshake(_)
                | KineticError::Authentication(_)
                | KineticError::Protocol(_)
        )
    }

    /// The device status code carried by this error, if any
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            KineticError::Status { code, .. } => Some(*code),
            KineticError::ClusterVersionMismatch { .. } => Some(StatusCode::VersionFailure),
            KineticError::BatchAborted { .. } => Some(StatusCode::InvalidBatch),
            _ => None,
        }
    }

    /// Whether the device answered NOT_FOUND
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NotFound)
    }

    /// True for read timeouts surfaced by the socket
    pub(crate) fn is_timeout(&self) -> bool {
        match self {
            KineticError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
