//! Command definitions
//!
//! A command is the protocol message describing one operation: a header with
//! the connection identity and sequencing, an operation-specific body and,
//! on responses, a status.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::body::Body;
use super::status::Status;

/// Message types
///
/// Every request type has a matching response type whose wire value is one
/// lower than the request's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum MessageType {
    GetResponse = 1,
    Get = 2,
    PutResponse = 3,
    Put = 4,
    DeleteResponse = 5,
    Delete = 6,
    GetNextResponse = 7,
    GetNext = 8,
    GetPreviousResponse = 9,
    GetPrevious = 10,
    GetKeyRangeResponse = 11,
    GetKeyRange = 12,
    GetVersionResponse = 15,
    GetVersion = 16,
    SetupResponse = 21,
    Setup = 22,
    GetLogResponse = 23,
    GetLog = 24,
    SecurityResponse = 25,
    Security = 26,
    PeerToPeerPushResponse = 27,
    PeerToPeerPush = 28,
    NoopResponse = 29,
    Noop = 30,
    FlushAllDataResponse = 31,
    FlushAllData = 32,
    PinOpResponse = 35,
    PinOp = 36,
    StartBatchResponse = 41,
    StartBatch = 42,
    EndBatchResponse = 43,
    EndBatch = 44,
    AbortBatchResponse = 45,
    AbortBatch = 46,
}

impl MessageType {
    /// The response type the device answers this request type with
    pub fn response_type(&self) -> MessageType {
        match self {
            MessageType::Get => MessageType::GetResponse,
            MessageType::Put => MessageType::PutResponse,
            MessageType::Delete => MessageType::DeleteResponse,
            MessageType::GetNext => MessageType::GetNextResponse,
            MessageType::GetPrevious => MessageType::GetPreviousResponse,
            MessageType::GetKeyRange => MessageType::GetKeyRangeResponse,
            MessageType::GetVersion => MessageType::GetVersionResponse,
            MessageType::Setup => MessageType::SetupResponse,
            MessageType::GetLog => MessageType::GetLogResponse,
            MessageType::Security => MessageType::SecurityResponse,
            MessageType::PeerToPeerPush => MessageType::PeerToPeerPushResponse,
            MessageType::Noop => MessageType::NoopResponse,
            MessageType::FlushAllData => MessageType::FlushAllDataResponse,
            MessageType::PinOp => MessageType::PinOpResponse,
            MessageType::StartBatch => MessageType::StartBatchResponse,
            MessageType::EndBatch => MessageType::EndBatchResponse,
            MessageType::AbortBatch => MessageType::AbortBatchResponse,
            other => *other,
        }
    }

    /// Whether this is a response type
    pub fn is_response(&self) -> bool {
        (*self as i32) % 2 == 1
    }
}

/// Request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Lowest = 1,
    Lower = 3,
    Normal = 5,
    Higher = 7,
    Highest = 9,
}

/// Command header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Device-wide epoch the request was issued against
    pub cluster_version: i64,

    /// Connection id assigned by the device at connect time
    pub connection_id: i64,

    /// Request sequence, unique and increasing per connection
    pub sequence: u64,

    /// Sequence of the request this response answers (responses only)
    pub ack_sequence: Option<u64>,

    pub message_type: MessageType,

    /// Device-side timeout in milliseconds
    pub timeout: Option<u64>,

    pub priority: Option<Priority>,

    /// Batch this command belongs to
    pub batch_id: Option<u32>,
}

impl Header {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            cluster_version: 0,
            connection_id: 0,
            sequence: 0,
            ack_sequence: None,
            message_type,
            timeout: None,
            priority: None,
            batch_id: None,
        }
    }
}

/// A protocol command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub header: Header,
    pub body: Body,

    /// Present only on responses
    pub status: Option<Status>,
}

impl Command {
    /// Create a request command with an unstamped header
    pub fn new(message_type: MessageType, body: Body) -> Self {
        Self {
            header: Header::new(message_type),
            body,
            status: None,
        }
    }

    /// Build the response skeleton for this request
    pub fn response(&self, status: Status, body: Body) -> Self {
        let mut header = Header::new(self.header.message_type.response_type());
        header.ack_sequence = Some(self.header.sequence);
        header.connection_id = self.header.connection_id;
        header.cluster_version = self.header.cluster_version;
        Self {
            header,
            body,
            status: Some(status),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Serialize to command bytes (the bytes the HMAC is computed over)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from command bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A verified command received from the device, with its attached value
#[derive(Debug, Clone)]
pub struct Reply {
    pub command: Command,
    pub value: Option<bytes::Bytes>,
}

impl Reply {
    /// Unsolicited status frames carry no ack sequence
    pub fn is_unsolicited(&self) -> bool {
        self.command.header.ack_sequence.is_none()
    }

    pub fn ack_sequence(&self) -> Option<u64> {
        self.command.header.ack_sequence
    }

    pub fn status(&self) -> Option<&Status> {
        self.command.status.as_ref()
    }
}
