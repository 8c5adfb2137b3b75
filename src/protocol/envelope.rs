//! Envelope definitions
//!
//! The envelope is the authenticated wrapper written inside every frame: the
//! serialized command bytes plus the token that authenticates them.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the command inside the envelope is authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// HMAC-SHA1 digest keyed by the identity's secret
    Hmac,
    /// Plaintext pre-shared PIN
    Pin,
    /// Device-originated status, not authenticated
    UnsolicitedStatus,
}

/// HMAC token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmacAuth {
    pub identity: i64,
    pub hmac: Vec<u8>,
}

/// PIN token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAuth {
    pub pin: Vec<u8>,
}

/// Authenticated message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub auth_type: AuthType,
    pub hmac_auth: Option<HmacAuth>,
    pub pin_auth: Option<PinAuth>,
    pub command_bytes: Vec<u8>,
}

impl Envelope {
    /// Envelope for a device-originated status (no token)
    pub fn unsolicited(command_bytes: Vec<u8>) -> Self {
        Self {
            auth_type: AuthType::UnsolicitedStatus,
            hmac_auth: None,
            pin_auth: None,
            command_bytes,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
