//! Message authentication
//!
//! Signs outgoing commands and verifies incoming ones.
//!
//! The HMAC covers `len(command_bytes) as u32 big-endian || command_bytes`
//! and is keyed by the identity's shared secret. PIN mode carries the PIN
//! in the clear and is only ever used for requests.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{KineticError, Result};

use super::command::Command;
use super::envelope::{AuthType, Envelope, HmacAuth, PinAuth};

type HmacSha1 = Hmac<Sha1>;

/// Compute the HMAC-SHA1 digest of a serialized command
pub fn calculate_hmac(secret: &[u8], command_bytes: &[u8]) -> Result<Vec<u8>> {
    let mac = keyed_mac(secret, command_bytes)?;
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a digest against a serialized command in constant time
pub fn verify_hmac(secret: &[u8], command_bytes: &[u8], digest: &[u8]) -> Result<()> {
    keyed_mac(secret, command_bytes)?
        .verify_slice(digest)
        .map_err(|_| KineticError::Authentication("HMAC mismatch".to_string()))
}

fn keyed_mac(secret: &[u8], command_bytes: &[u8]) -> Result<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| KineticError::Authentication(format!("invalid HMAC key: {}", e)))?;
    mac.update(&(command_bytes.len() as u32).to_be_bytes());
    mac.update(command_bytes);
    Ok(mac)
}

/// Per-request authentication mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Sign with the connection's identity (default)
    #[default]
    Hmac,
    /// Present a PIN (lock/unlock/erase)
    Pin(Vec<u8>),
}

/// Signs and verifies envelopes for one identity
#[derive(Debug, Clone)]
pub struct Authenticator {
    identity: i64,
    secret: Vec<u8>,
}

impl Authenticator {
    pub fn new(identity: i64, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            identity,
            secret: secret.into(),
        }
    }

    pub fn identity(&self) -> i64 {
        self.identity
    }

    /// Serialize a command and wrap it in an authenticated envelope
    pub fn seal(&self, command: &Command, mode: &AuthMode) -> Result<Envelope> {
        let command_bytes = command.to_bytes()?;
        self.seal_bytes(command_bytes, mode)
    }

    /// Wrap already serialized command bytes
    pub fn seal_bytes(&self, command_bytes: Vec<u8>, mode: &AuthMode) -> Result<Envelope> {
        let envelope = match mode {
            AuthMode::Hmac => Envelope {
                auth_type: AuthType::Hmac,
                hmac_auth: Some(HmacAuth {
                    identity: self.identity,
                    hmac: calculate_hmac(&self.secret, &command_bytes)?,
                }),
                pin_auth: None,
                command_bytes,
            },
            AuthMode::Pin(pin) => Envelope {
                auth_type: AuthType::Pin,
                hmac_auth: None,
                pin_auth: Some(PinAuth { pin: pin.clone() }),
                command_bytes,
            },
        };
        Ok(envelope)
    }

    /// Verify an incoming envelope and decode its command.
    ///
    /// Solicited responses must be signed by this identity. Unsolicited
    /// status envelopes carry no token.
    pub fn open(&self, envelope: &Envelope) -> Result<Command> {
        match envelope.auth_type {
            AuthType::Hmac => {
                let auth = envelope.hmac_auth.as_ref().ok_or_else(|| {
                    KineticError::Authentication("HMAC envelope without token".to_string())
                })?;
                if auth.identity != self.identity {
                    return Err(KineticError::Authentication(format!(
                        "unexpected identity {} (expected {})",
                        auth.identity, self.identity
                    )));
                }
                verify_hmac(&self.secret, &envelope.command_bytes, &auth.hmac)?;
            }
            AuthType::UnsolicitedStatus => {}
            AuthType::Pin => {
                return Err(KineticError::Authentication(
                    "PIN authenticated response".to_string(),
                ))
            }
        }
        Command::from_bytes(&envelope.command_bytes)
    }
}
