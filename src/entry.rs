//! Entries and key ranges
//!
//! Client-side views of what the device stores.

use bytes::Bytes;

use crate::protocol::{Command, IntegrityAlgorithm, KeyValue, Body};

/// Maximum key size accepted by the device (4 KB)
pub const MAX_KEY_SIZE: usize = 4 * 1024;

/// Maximum value size accepted by the device (1 MB)
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Entry metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Opaque version token
    pub version: Option<Vec<u8>>,

    /// Integrity tag
    pub tag: Option<Vec<u8>>,
    pub algorithm: Option<IntegrityAlgorithm>,
}

impl EntryMetadata {
    pub(crate) fn from_key_value(kv: &KeyValue) -> Self {
        Self {
            version: kv.db_version.clone(),
            tag: kv.tag.clone(),
            algorithm: kv.algorithm,
        }
    }
}

/// A key/value pair as stored on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,

    /// None for metadata-only reads; an empty value is `Some` with no bytes
    pub value: Option<Bytes>,
    pub metadata: EntryMetadata,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            metadata: EntryMetadata::default(),
        }
    }

    /// Build from a response carrying a key/value body
    pub(crate) fn from_response(command: &Command, value: Option<Bytes>) -> Option<Self> {
        match &command.body {
            Body::KeyValue(kv) => Some(Self {
                key: kv.key.clone(),
                value,
                metadata: EntryMetadata::from_key_value(kv),
            }),
            _ => None,
        }
    }

    /// Value bytes, empty when absent
    pub fn value_bytes(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }
}

/// Bounds of a key range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl KeyRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    pub fn with_bounds(mut self, start_inclusive: bool, end_inclusive: bool) -> Self {
        self.start_inclusive = start_inclusive;
        self.end_inclusive = end_inclusive;
        self
    }

    /// Every key starting with `prefix`: `[prefix, prefix + 1)`
    ///
    /// The last byte of the prefix is incremented; trailing 0xFF bytes are
    /// dropped first so the bound stays a proper successor. An all-0xFF
    /// prefix has no successor and the range runs to the end of key space.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let start: Vec<u8> = prefix.into();
        let mut end = start.clone();
        while let Some(last) = end.pop() {
            if last < 0xFF {
                end.push(last + 1);
                return Self::new(start, end).with_bounds(true, false);
            }
        }
        Self::new(start, vec![0xFF; MAX_KEY_SIZE])
    }

    /// Whether `key` falls inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = if self.start_inclusive {
            key >= self.start_key.as_slice()
        } else {
            key > self.start_key.as_slice()
        };
        let below_end = if self.end_inclusive {
            key <= self.end_key.as_slice()
        } else {
            key < self.end_key.as_slice()
        };
        above_start && below_end
    }
}

/// A key to push to a peer, with optional per-key settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushKey {
    pub key: Vec<u8>,
    pub version: Option<Vec<u8>>,

    /// Store under this key on the peer (ignored on piped pushes)
    pub new_key: Option<Vec<u8>>,
    pub force: bool,
}

impl PushKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

impl From<&[u8]> for PushKey {
    fn from(key: &[u8]) -> Self {
        PushKey::new(key)
    }
}

impl From<Vec<u8>> for PushKey {
    fn from(key: Vec<u8>) -> Self {
        PushKey::new(key)
    }
}

impl From<&str> for PushKey {
    fn from(key: &str) -> Self {
        PushKey::new(key.as_bytes())
    }
}
