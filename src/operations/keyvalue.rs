//! Key/value operations
//!
//! Builders for PUT, GET, DELETE and the key-navigation requests, plus the
//! size checks every key and value goes through before it reaches a socket.

use std::time::Duration;

use bytes::Bytes;

use crate::entry::{KeyRange, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::error::{KineticError, Result};
use crate::protocol::{
    Body, Command, IntegrityAlgorithm, KeyValue, MessageType, Priority, Range, Synchronization,
};

// =============================================================================
// Validation
// =============================================================================

/// Reject keys the device would refuse
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(KineticError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

/// Reject values the device would refuse
pub fn validate_value(value: &[u8]) -> Result<()> {
    validate_value_len(value.len())
}

pub(crate) fn validate_value_len(len: usize) -> Result<()> {
    if len > MAX_VALUE_SIZE {
        return Err(KineticError::ValueTooLarge {
            len,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

// =============================================================================
// Options
// =============================================================================

/// Options for a PUT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Version the stored entry must currently have
    pub version: Option<Vec<u8>>,

    /// Version to store the entry under
    pub new_version: Option<Vec<u8>>,

    /// Ignore the stored version
    pub force: bool,

    /// Integrity tag. Defaults to a CRC32 of the value.
    pub tag: Option<Vec<u8>>,
    pub algorithm: Option<IntegrityAlgorithm>,

    pub synchronization: Option<Synchronization>,
    pub priority: Option<Priority>,
    pub timeout: Option<Duration>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn new_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.new_version = Some(version.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn tag(mut self, tag: impl Into<Vec<u8>>, algorithm: IntegrityAlgorithm) -> Self {
        self.tag = Some(tag.into());
        self.algorithm = Some(algorithm);
        self
    }

    pub fn synchronization(mut self, mode: Synchronization) -> Self {
        self.synchronization = Some(mode);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for a DELETE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub version: Option<Vec<u8>>,
    pub force: bool,
    pub synchronization: Option<Synchronization>,
    pub priority: Option<Priority>,
    pub timeout: Option<Duration>,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn synchronization(mut self, mode: Synchronization) -> Self {
        self.synchronization = Some(mode);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// =============================================================================
// Builders
// =============================================================================

/// CRC32 of a value as a big-endian tag
pub fn crc32_tag(value: &[u8]) -> Vec<u8> {
    crc32fast::hash(value).to_be_bytes().to_vec()
}

pub(crate) fn put(key: &[u8], value: &Bytes, options: &PutOptions) -> Result<Command> {
    validate_key(key)?;
    validate_value(value)?;
    put_with_tag(key, options, || crc32_tag(value))
}

/// PUT whose value is streamed from elsewhere; only its length is known
pub(crate) fn put_sized(key: &[u8], len: usize, options: &PutOptions) -> Result<Command> {
    validate_key(key)?;
    validate_value_len(len)?;
    // No bytes to checksum; an untagged entry is legal.
    put_with_tag(key, options, Vec::new)
}

fn put_with_tag(
    key: &[u8],
    options: &PutOptions,
    default_tag: impl FnOnce() -> Vec<u8>,
) -> Result<Command> {
    let (tag, algorithm) = match (&options.tag, options.algorithm) {
        (Some(tag), algorithm) => (Some(tag.clone()), algorithm),
        (None, _) => {
            let tag = default_tag();
            if tag.is_empty() {
                (None, None)
            } else {
                (Some(tag), Some(IntegrityAlgorithm::Crc32))
            }
        }
    };

    let kv = KeyValue {
        db_version: options.version.clone(),
        new_version: options.new_version.clone(),
        force: options.force,
        tag,
        algorithm,
        synchronization: options.synchronization,
        ..KeyValue::with_key(key)
    };

    let mut command = Command::new(MessageType::Put, Body::KeyValue(kv));
    apply_header_options(&mut command, options.priority, options.timeout);
    Ok(command)
}

pub(crate) fn get(key: &[u8], metadata_only: bool) -> Result<Command> {
    validate_key(key)?;
    let kv = KeyValue {
        metadata_only,
        ..KeyValue::with_key(key)
    };
    Ok(Command::new(MessageType::Get, Body::KeyValue(kv)))
}

pub(crate) fn delete(key: &[u8], options: &DeleteOptions) -> Result<Command> {
    validate_key(key)?;
    let kv = KeyValue {
        db_version: options.version.clone(),
        force: options.force,
        synchronization: options.synchronization,
        ..KeyValue::with_key(key)
    };
    let mut command = Command::new(MessageType::Delete, Body::KeyValue(kv));
    apply_header_options(&mut command, options.priority, options.timeout);
    Ok(command)
}

/// GETNEXT, GETPREVIOUS and GETVERSION share the key-only body
pub(crate) fn keyed(message_type: MessageType, key: &[u8]) -> Result<Command> {
    validate_key(key)?;
    Ok(Command::new(
        message_type,
        Body::KeyValue(KeyValue::with_key(key)),
    ))
}

pub(crate) fn key_range(range: &KeyRange, max_returned: u32, reverse: bool) -> Result<Command> {
    validate_key(&range.start_key)?;
    validate_key(&range.end_key)?;
    if max_returned == 0 {
        return Err(KineticError::InvalidArgument(
            "max_returned must be positive".to_string(),
        ));
    }
    let body = Range {
        start_key: range.start_key.clone(),
        end_key: range.end_key.clone(),
        start_key_inclusive: range.start_inclusive,
        end_key_inclusive: range.end_inclusive,
        max_returned,
        reverse,
        keys: Vec::new(),
    };
    Ok(Command::new(MessageType::GetKeyRange, Body::Range(body)))
}

fn apply_header_options(command: &mut Command, priority: Option<Priority>, timeout: Option<Duration>) {
    command.header.priority = priority;
    command.header.timeout = timeout.map(|t| t.as_millis() as u64);
}
