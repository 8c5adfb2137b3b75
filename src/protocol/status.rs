//! Status definitions
//!
//! Status codes carried on device responses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    NotAttempted = 0,
    Success = 1,
    HmacFailure = 2,
    NotAuthorized = 3,
    /// The cluster version in the request did not match the device
    VersionFailure = 4,
    InternalError = 5,
    HeaderRequired = 6,
    NotFound = 7,
    /// The entry version in the request did not match the stored entry
    VersionMismatch = 8,
    ServiceBusy = 9,
    Expired = 10,
    DataError = 11,
    PermDataError = 12,
    RemoteConnectionError = 13,
    NoSpace = 14,
    NoSuchHmacAlgorithm = 15,
    InvalidRequest = 16,
    NestedOperationErrors = 17,
    DeviceLocked = 18,
    DeviceAlreadyUnlocked = 19,
    ConnectionTerminated = 20,
    InvalidBatch = 21,
}

impl StatusCode {
    /// Symbolic protocol name of the code
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::NotAttempted => "NOT_ATTEMPTED",
            StatusCode::Success => "SUCCESS",
            StatusCode::HmacFailure => "HMAC_FAILURE",
            StatusCode::NotAuthorized => "NOT_AUTHORIZED",
            StatusCode::VersionFailure => "VERSION_FAILURE",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::HeaderRequired => "HEADER_REQUIRED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::VersionMismatch => "VERSION_MISMATCH",
            StatusCode::ServiceBusy => "SERVICE_BUSY",
            StatusCode::Expired => "EXPIRED",
            StatusCode::DataError => "DATA_ERROR",
            StatusCode::PermDataError => "PERM_DATA_ERROR",
            StatusCode::RemoteConnectionError => "REMOTE_CONNECTION_ERROR",
            StatusCode::NoSpace => "NO_SPACE",
            StatusCode::NoSuchHmacAlgorithm => "NO_SUCH_HMAC_ALGORITHM",
            StatusCode::InvalidRequest => "INVALID_REQUEST",
            StatusCode::NestedOperationErrors => "NESTED_OPERATION_ERRORS",
            StatusCode::DeviceLocked => "DEVICE_LOCKED",
            StatusCode::DeviceAlreadyUnlocked => "DEVICE_ALREADY_UNLOCKED",
            StatusCode::ConnectionTerminated => "CONNECTION_TERMINATED",
            StatusCode::InvalidBatch => "INVALID_BATCH",
        }
    }

    /// Numeric wire value
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status attached to a response command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Status code
    pub code: StatusCode,

    /// Human readable message (may be empty)
    pub message: String,

    /// Optional opaque detail supplied by the device
    pub detailed_message: Option<Vec<u8>>,
}

impl Status {
    /// Create a SUCCESS status
    pub fn success() -> Self {
        Self::new(StatusCode::Success, "")
    }

    /// Create a status with the given code and message
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detailed_message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}
