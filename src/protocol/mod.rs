//! Protocol Module
//!
//! Defines the wire protocol spoken with a Kinetic device.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬────────────────┬────────────────┬──────────────┬─────────────┐
//! │ 'F' (1)  │ EnvelopeLen(4) │  ValueLen (4)  │   Envelope   │    Value    │
//! └──────────┴────────────────┴────────────────┴──────────────┴─────────────┘
//! ```
//!
//! ## Envelope
//! - auth type: HMAC | PIN | UNSOLICITED_STATUS
//! - token: identity + HMAC-SHA1 digest, or PIN
//! - command bytes: the serialized [`Command`]
//!
//! ## Command
//! - header: cluster version, connection id, sequence, ack sequence, type
//! - body: operation payload
//! - status: code + message (responses only)

mod auth;
mod body;
mod codec;
mod command;
mod envelope;
mod status;

pub use auth::{calculate_hmac, verify_hmac, AuthMode, Authenticator};
pub use body::{
    Acl, BatchInfo, Body, GetLog, HmacAlgorithm, IntegrityAlgorithm, KeyValue, LogRecord,
    LogType, P2pItem, P2pOperation, Peer, Permission, PinOp, PinOpKind, Range, Scope, Security,
    Setup, Synchronization,
};
pub use codec::{
    encode_frame, read_envelope, read_frame, read_frame_header, read_full, write_frame,
    write_frame_head, Frame, FrameCodec, FrameHeader, HEADER_SIZE, MAGIC, MAX_ENVELOPE_SIZE,
    MAX_FRAME_VALUE_SIZE,
};
pub use command::{Command, Header, MessageType, Priority, Reply};
pub use envelope::{AuthType, Envelope, HmacAuth, PinAuth};
pub use status::{Status, StatusCode};
