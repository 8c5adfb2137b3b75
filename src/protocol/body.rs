//! Command body definitions
//!
//! Operation-specific payloads. A command carries exactly one body variant.

use serde::{Deserialize, Serialize};

use super::status::Status;

/// Integrity algorithm used to compute an entry's tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityAlgorithm {
    Sha1,
    Sha2,
    Sha3,
    Crc32,
    Crc64,
    /// Private algorithms (100 and up)
    Private(u32),
}

/// Persistence mode requested for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Synchronization {
    WriteThrough,
    WriteBack,
    Flush,
}

/// Body payload by operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Empty,
    KeyValue(KeyValue),
    Range(Range),
    PeerToPeer(P2pOperation),
    GetLog(GetLog),
    Setup(Setup),
    Security(Security),
    PinOp(PinOp),
    Batch(BatchInfo),
}

// =============================================================================
// Key/Value
// =============================================================================

/// Key/value body used by get/put/delete and friends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,

    /// Version the write expects to replace (or the stored version on reads)
    pub db_version: Option<Vec<u8>>,

    /// Version to store with the new value
    pub new_version: Option<Vec<u8>>,

    /// Ignore version checks
    pub force: bool,

    pub tag: Option<Vec<u8>>,
    pub algorithm: Option<IntegrityAlgorithm>,

    /// Return metadata without the value
    pub metadata_only: bool,

    pub synchronization: Option<Synchronization>,
}

impl KeyValue {
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

/// Key range body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub start_key_inclusive: bool,
    pub end_key_inclusive: bool,
    pub max_returned: u32,
    pub reverse: bool,

    /// Keys returned by the device (responses only)
    pub keys: Vec<Vec<u8>>,
}

// =============================================================================
// Peer to Peer
// =============================================================================

/// A device reachable by another device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
}

impl Peer {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            tls: false,
        }
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new("localhost", 8123)
    }
}

/// Push request: the device relays the listed keys to `peer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pOperation {
    pub peer: Peer,
    pub operations: Vec<P2pItem>,

    /// Set on responses
    pub all_child_operations_succeeded: Option<bool>,
}

/// One key within a push request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pItem {
    pub key: Vec<u8>,
    pub version: Option<Vec<u8>>,

    /// Store under a different key on the peer
    pub new_key: Option<Vec<u8>>,
    pub force: bool,

    /// Nested push the peer performs next (piped push)
    pub next: Option<Box<P2pOperation>>,

    /// Per-key outcome (responses only)
    pub status: Option<Status>,
}

// =============================================================================
// Administration
// =============================================================================

/// Device log categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    Utilizations,
    Temperatures,
    Capacities,
    Configuration,
    Statistics,
    Messages,
    Limits,
    Device,
}

impl LogType {
    /// Every type a plain `get_log` can request (DEVICE needs a name)
    pub fn all() -> Vec<LogType> {
        vec![
            LogType::Utilizations,
            LogType::Temperatures,
            LogType::Capacities,
            LogType::Configuration,
            LogType::Statistics,
            LogType::Messages,
            LogType::Limits,
        ]
    }
}

/// One record in a device log response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_type: LogType,
    pub payload: Vec<u8>,
}

/// Get log body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLog {
    pub types: Vec<LogType>,
    pub device_name: Option<Vec<u8>>,

    /// Filled in by the device
    pub records: Vec<LogRecord>,
}

/// Setup body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub new_cluster_version: Option<i64>,

    /// The attached value is a firmware image
    pub firmware_download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    HmacSha1,
}

/// Permission granted by an ACL scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    Delete,
    Range,
    Setup,
    P2pOp,
    GetLog,
    Security,
}

impl Permission {
    pub fn all() -> Vec<Permission> {
        vec![
            Permission::Read,
            Permission::Write,
            Permission::Delete,
            Permission::Range,
            Permission::Setup,
            Permission::P2pOp,
            Permission::GetLog,
            Permission::Security,
        ]
    }
}

/// Key-prefix scope of an ACL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub offset: Option<i64>,
    pub value: Option<Vec<u8>>,
    pub permissions: Vec<Permission>,
    pub tls_required: bool,
}

/// Access control entry for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub identity: i64,
    pub key: Vec<u8>,
    pub hmac_algorithm: HmacAlgorithm,
    pub scopes: Vec<Scope>,
    pub max_priority: super::command::Priority,
}

impl Acl {
    pub fn new(identity: i64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            identity,
            key: key.into(),
            hmac_algorithm: HmacAlgorithm::HmacSha1,
            scopes: Vec::new(),
            max_priority: super::command::Priority::Normal,
        }
    }
}

/// Security body (ACLs and PIN changes)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub acls: Vec<Acl>,
    pub old_lock_pin: Option<Vec<u8>>,
    pub new_lock_pin: Option<Vec<u8>>,
    pub old_erase_pin: Option<Vec<u8>>,
    pub new_erase_pin: Option<Vec<u8>>,
}

/// PIN-authenticated device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinOpKind {
    Unlock,
    Lock,
    Erase,
    SecureErase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinOp {
    pub kind: PinOpKind,
}

// =============================================================================
// Batch
// =============================================================================

/// End-batch body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Number of operations sent within the batch
    pub count: u32,

    /// Sequence of the operation that made the batch fail (responses only)
    pub failed_sequence: Option<u64>,
}
