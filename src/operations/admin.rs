//! Administrative operations
//!
//! Device management requests and the guards that gate them. Guards run
//! before anything is built, so a refused call never touches the network.

use bytes::Bytes;

use crate::error::{KineticError, Result};
use crate::protocol::{
    Acl, Body, Command, GetLog, LogType, MessageType, PinOp, PinOpKind, Security, Setup,
};

// =============================================================================
// Guards
// =============================================================================

/// Require a TLS-secured connection
pub fn require_tls(secure: bool) -> Result<()> {
    if secure {
        Ok(())
    } else {
        Err(KineticError::TlsRequired)
    }
}

/// Resolve the PIN for a PIN-authenticated call
///
/// An explicit PIN wins over the configured one. An empty PIN counts as
/// absent.
pub fn require_pin(explicit: Option<&[u8]>, configured: Option<&[u8]>) -> Result<Vec<u8>> {
    explicit
        .or(configured)
        .filter(|pin| !pin.is_empty())
        .map(<[u8]>::to_vec)
        .ok_or(KineticError::PinRequired)
}

// =============================================================================
// Builders
// =============================================================================

pub(crate) fn get_log(types: &[LogType], device_name: Option<&[u8]>) -> Result<Command> {
    if types.is_empty() && device_name.is_none() {
        return Err(KineticError::InvalidArgument(
            "no log types requested".to_string(),
        ));
    }
    let mut types = types.to_vec();
    if device_name.is_some() && !types.contains(&LogType::Device) {
        types.push(LogType::Device);
    }
    let body = GetLog {
        types,
        device_name: device_name.map(<[u8]>::to_vec),
        records: Vec::new(),
    };
    Ok(Command::new(MessageType::GetLog, Body::GetLog(body)))
}

pub(crate) fn set_cluster_version(version: i64) -> Command {
    let body = Setup {
        new_cluster_version: Some(version),
        firmware_download: false,
    };
    Command::new(MessageType::Setup, Body::Setup(body))
}

pub(crate) fn update_firmware(image: &Bytes) -> Result<Command> {
    if image.is_empty() {
        return Err(KineticError::InvalidArgument(
            "firmware image is empty".to_string(),
        ));
    }
    let body = Setup {
        new_cluster_version: None,
        firmware_download: true,
    };
    Ok(Command::new(MessageType::Setup, Body::Setup(body)))
}

pub(crate) fn pin_op(kind: PinOpKind) -> Command {
    Command::new(MessageType::PinOp, Body::PinOp(PinOp { kind }))
}

pub(crate) fn security(security: &Security) -> Result<Command> {
    if security.acls.is_empty()
        && security.new_lock_pin.is_none()
        && security.new_erase_pin.is_none()
    {
        return Err(KineticError::InvalidArgument(
            "security request changes nothing".to_string(),
        ));
    }
    Ok(Command::new(
        MessageType::Security,
        Body::Security(security.clone()),
    ))
}

/// Security body replacing the ACL list
pub fn acl_update(acls: Vec<Acl>) -> Security {
    Security {
        acls,
        ..Default::default()
    }
}

/// Security body changing the erase PIN
pub fn erase_pin_update(old_pin: Option<&[u8]>, new_pin: &[u8]) -> Security {
    Security {
        old_erase_pin: old_pin.map(<[u8]>::to_vec),
        new_erase_pin: Some(new_pin.to_vec()),
        ..Default::default()
    }
}

/// Security body changing the lock PIN
pub fn lock_pin_update(old_pin: Option<&[u8]>, new_pin: &[u8]) -> Security {
    Security {
        old_lock_pin: old_pin.map(<[u8]>::to_vec),
        new_lock_pin: Some(new_pin.to_vec()),
        ..Default::default()
    }
}
