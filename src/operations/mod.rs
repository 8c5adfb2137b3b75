//! Operation Codec
//!
//! Turns typed requests into commands and responses back into typed results.
//!
//! ## Dispatch
//! ```text
//!            build()                         complete()
//!  Operation ───────► Request ──► wire ──► Reply ─────────► Outcome
//!                     (command,            │                  ▲
//!                      value,              ▼                  │
//!                      auth)         check_status ──► parse ──┤
//!                                          │                  │
//!                                          └─────► on_error ──┘
//! ```
//!
//! Every operation the client can issue is one variant of [`Operation`], so
//! build, parse and error translation are exhaustive matches over one
//! closed set.
//!
//! ## Status translation
//! - SUCCESS: parse the response
//! - VERSION_FAILURE: [`KineticError::ClusterVersionMismatch`] with the
//!   device's cluster version
//! - INVALID_BATCH: [`KineticError::BatchAborted`]
//! - anything else: [`KineticError::Status`]
//!
//! The read family maps NOT_FOUND to "no entry" and DELETE maps it to
//! `false`; every other operation re-raises.

mod admin;
mod batch;
mod keyvalue;
mod p2p;

use bytes::Bytes;

use crate::entry::{Entry, KeyRange};
use crate::error::{KineticError, Result};
use crate::protocol::{
    AuthMode, Body, Command, LogRecord, LogType, MessageType, P2pItem, P2pOperation, PinOpKind,
    Reply, Security, StatusCode,
};

pub use admin::{acl_update, erase_pin_update, lock_pin_update, require_pin, require_tls};
pub use keyvalue::{crc32_tag, validate_key, validate_value, DeleteOptions, PutOptions};
pub use p2p::{build_piped_push, build_push, hops};

// =============================================================================
// Operation
// =============================================================================

/// A typed request
#[derive(Debug, Clone)]
pub enum Operation {
    Noop,
    Flush,
    Put {
        key: Vec<u8>,
        value: Bytes,
        options: PutOptions,
    },
    /// PUT whose value is written by the caller after the frame head
    PutStreamed {
        key: Vec<u8>,
        len: usize,
        options: PutOptions,
    },
    Get {
        key: Vec<u8>,
    },
    GetMetadata {
        key: Vec<u8>,
    },
    Delete {
        key: Vec<u8>,
        options: DeleteOptions,
    },
    GetNext {
        key: Vec<u8>,
    },
    GetPrevious {
        key: Vec<u8>,
    },
    GetVersion {
        key: Vec<u8>,
    },
    GetKeyRange {
        range: KeyRange,
        max_returned: u32,
        reverse: bool,
    },
    Push {
        request: P2pOperation,
    },
    GetLog {
        types: Vec<LogType>,
        device_name: Option<Vec<u8>>,
    },
    SetClusterVersion {
        version: i64,
    },
    UpdateFirmware {
        image: Bytes,
    },
    Security {
        security: Security,
    },
    PinOp {
        kind: PinOpKind,
        pin: Vec<u8>,
    },
    StartBatch {
        batch_id: u32,
    },
    EndBatch {
        batch_id: u32,
        count: u32,
    },
    AbortBatch {
        batch_id: u32,
    },
}

/// A built request, ready to be stamped and signed
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,
    pub value: Option<Bytes>,
    pub auth: AuthMode,

    /// Whether a response is expected
    pub ack: bool,
}

impl Request {
    fn new(command: Command) -> Self {
        Self {
            command,
            value: None,
            auth: AuthMode::Hmac,
            ack: true,
        }
    }

    fn with_value(mut self, value: Bytes) -> Self {
        self.value = Some(value).filter(|v| !v.is_empty());
        self
    }

    /// Attach to a batch. The device answers only the batch's END/ABORT.
    pub fn in_batch(mut self, batch_id: u32) -> Self {
        self.command.header.batch_id = Some(batch_id);
        self.ack = false;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.command.message_type()
    }
}

impl Operation {
    /// Build the request, validating arguments before any I/O
    pub fn build(&self) -> Result<Request> {
        let request = match self {
            Operation::Noop => Request::new(Command::new(MessageType::Noop, Body::Empty)),
            Operation::Flush => Request::new(Command::new(MessageType::FlushAllData, Body::Empty)),
            Operation::Put {
                key,
                value,
                options,
            } => Request::new(keyvalue::put(key, value, options)?).with_value(value.clone()),
            Operation::PutStreamed { key, len, options } => {
                Request::new(keyvalue::put_sized(key, *len, options)?)
            }
            Operation::Get { key } => Request::new(keyvalue::get(key, false)?),
            Operation::GetMetadata { key } => Request::new(keyvalue::get(key, true)?),
            Operation::Delete { key, options } => Request::new(keyvalue::delete(key, options)?),
            Operation::GetNext { key } => Request::new(keyvalue::keyed(MessageType::GetNext, key)?),
            Operation::GetPrevious { key } => {
                Request::new(keyvalue::keyed(MessageType::GetPrevious, key)?)
            }
            Operation::GetVersion { key } => {
                Request::new(keyvalue::keyed(MessageType::GetVersion, key)?)
            }
            Operation::GetKeyRange {
                range,
                max_returned,
                reverse,
            } => Request::new(keyvalue::key_range(range, *max_returned, *reverse)?),
            Operation::Push { request } => Request::new(Command::new(
                MessageType::PeerToPeerPush,
                Body::PeerToPeer(request.clone()),
            )),
            Operation::GetLog { types, device_name } => {
                Request::new(admin::get_log(types, device_name.as_deref())?)
            }
            Operation::SetClusterVersion { version } => {
                Request::new(admin::set_cluster_version(*version))
            }
            Operation::UpdateFirmware { image } => {
                Request::new(admin::update_firmware(image)?).with_value(image.clone())
            }
            Operation::Security { security } => Request::new(admin::security(security)?),
            Operation::PinOp { kind, pin } => {
                let mut request = Request::new(admin::pin_op(*kind));
                request.auth = AuthMode::Pin(pin.clone());
                request
            }
            Operation::StartBatch { batch_id } => Request::new(batch::start(*batch_id)),
            Operation::EndBatch { batch_id, count } => Request::new(batch::end(*batch_id, *count)),
            Operation::AbortBatch { batch_id } => Request::new(batch::abort(*batch_id)),
        };
        Ok(request)
    }

    /// Turn a delivered response, or the error that replaced it, into a result
    pub fn complete(&self, result: Result<Reply>) -> Result<Outcome> {
        match result.and_then(|reply| self.parse(reply)) {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.on_error(err),
        }
    }

    /// Parse a response, translating its status first
    pub fn parse(&self, reply: Reply) -> Result<Outcome> {
        check_status(&reply.command)?;
        let Reply { command, value } = reply;

        let outcome = match self {
            Operation::Get { .. } | Operation::GetNext { .. } | Operation::GetPrevious { .. } => {
                // The frame carries no value bytes for an empty value
                let value = value.unwrap_or_default();
                Outcome::Entry(Some(expect_entry(&command, Some(value))?))
            }
            Operation::GetMetadata { .. } => Outcome::Entry(Some(expect_entry(&command, None)?)),
            Operation::Delete { .. } => Outcome::Deleted(true),
            Operation::GetVersion { .. } => match command.body {
                Body::KeyValue(kv) => Outcome::Version(kv.db_version),
                _ => return Err(unexpected_body(&command)),
            },
            Operation::GetKeyRange { .. } => match command.body {
                Body::Range(range) => Outcome::Keys(range.keys),
                _ => return Err(unexpected_body(&command)),
            },
            Operation::Push { .. } => match command.body {
                Body::PeerToPeer(p2p) => Outcome::Pushed(p2p.operations),
                _ => return Err(unexpected_body(&command)),
            },
            Operation::GetLog { .. } => match command.body {
                Body::GetLog(log) => Outcome::Log(LogReport {
                    records: log.records,
                    device: value,
                }),
                _ => return Err(unexpected_body(&command)),
            },
            Operation::Noop
            | Operation::Flush
            | Operation::Put { .. }
            | Operation::PutStreamed { .. }
            | Operation::SetClusterVersion { .. }
            | Operation::UpdateFirmware { .. }
            | Operation::Security { .. }
            | Operation::PinOp { .. }
            | Operation::StartBatch { .. }
            | Operation::EndBatch { .. }
            | Operation::AbortBatch { .. } => Outcome::Done,
        };
        Ok(outcome)
    }

    /// Map a benign status to a result, re-raise everything else
    pub fn on_error(&self, err: KineticError) -> Result<Outcome> {
        if !err.is_not_found() {
            return Err(err);
        }
        match self {
            Operation::Get { .. }
            | Operation::GetMetadata { .. }
            | Operation::GetNext { .. }
            | Operation::GetPrevious { .. } => Ok(Outcome::Entry(None)),
            Operation::GetVersion { .. } => Ok(Outcome::Version(None)),
            Operation::Delete { .. } => Ok(Outcome::Deleted(false)),
            _ => Err(err),
        }
    }
}

/// Translate a response status into `Ok` or the matching error
pub fn check_status(command: &Command) -> Result<()> {
    let status = command
        .status
        .as_ref()
        .ok_or_else(|| KineticError::Protocol("response without status".to_string()))?;

    match status.code {
        StatusCode::Success => Ok(()),
        StatusCode::VersionFailure => Err(KineticError::ClusterVersionMismatch {
            actual: command.header.cluster_version,
            message: status.message.clone(),
        }),
        StatusCode::InvalidBatch => Err(KineticError::BatchAborted {
            failed_operation: match &command.body {
                Body::Batch(info) => info.failed_sequence,
                _ => None,
            },
            message: status.message.clone(),
        }),
        code => Err(KineticError::Status {
            code,
            message: status.message.clone(),
        }),
    }
}

fn expect_entry(command: &Command, value: Option<Bytes>) -> Result<Entry> {
    Entry::from_response(command, value).ok_or_else(|| unexpected_body(command))
}

fn unexpected_body(command: &Command) -> KineticError {
    KineticError::Protocol(format!(
        "unexpected body in {:?} response",
        command.message_type()
    ))
}

// =============================================================================
// Outcome
// =============================================================================

/// Device log records plus the raw DEVICE log, if one was requested
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogReport {
    pub records: Vec<LogRecord>,
    pub device: Option<Bytes>,
}

impl LogReport {
    pub fn record(&self, log_type: LogType) -> Option<&LogRecord> {
        self.records.iter().find(|r| r.log_type == log_type)
    }
}

/// Typed result of one operation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Entry(Option<Entry>),
    Deleted(bool),
    Keys(Vec<Vec<u8>>),
    Version(Option<Vec<u8>>),
    Pushed(Vec<P2pItem>),
    Log(LogReport),
}

impl Outcome {
    pub fn into_done(self) -> Result<()> {
        match self {
            Outcome::Done => Ok(()),
            other => Err(mismatch("done", &other)),
        }
    }

    pub fn into_entry(self) -> Result<Option<Entry>> {
        match self {
            Outcome::Entry(entry) => Ok(entry),
            other => Err(mismatch("entry", &other)),
        }
    }

    pub fn into_deleted(self) -> Result<bool> {
        match self {
            Outcome::Deleted(deleted) => Ok(deleted),
            other => Err(mismatch("deleted", &other)),
        }
    }

    pub fn into_keys(self) -> Result<Vec<Vec<u8>>> {
        match self {
            Outcome::Keys(keys) => Ok(keys),
            other => Err(mismatch("keys", &other)),
        }
    }

    pub fn into_version(self) -> Result<Option<Vec<u8>>> {
        match self {
            Outcome::Version(version) => Ok(version),
            other => Err(mismatch("version", &other)),
        }
    }

    pub fn into_pushed(self) -> Result<Vec<P2pItem>> {
        match self {
            Outcome::Pushed(items) => Ok(items),
            other => Err(mismatch("pushed", &other)),
        }
    }

    pub fn into_log(self) -> Result<LogReport> {
        match self {
            Outcome::Log(report) => Ok(report),
            other => Err(mismatch("log", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &Outcome) -> KineticError {
    KineticError::Protocol(format!("expected {} outcome, got {:?}", expected, got))
}
