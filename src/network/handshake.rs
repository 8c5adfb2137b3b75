//! Connect-time handshake
//!
//! Right after the socket opens the device sends one unsolicited status
//! frame. It carries the device's cluster version and the connection id
//! this session will use.

use std::io::Read;

use crate::error::{KineticError, Result};
use crate::protocol::{read_frame, Authenticator, Status, StatusCode};

use super::connection::open_frame;

/// What the device told us when the connection opened
#[derive(Debug, Clone)]
pub struct Handshake {
    pub connection_id: i64,
    pub cluster_version: i64,
    pub status: Status,
}

impl Handshake {
    pub fn is_locked(&self) -> bool {
        self.status.code == StatusCode::DeviceLocked
    }
}

/// Read and check the handshake frame
///
/// A locked device is only accepted over TLS, where it can be unlocked. A
/// pinned cluster version must match the device's exactly.
pub fn perform<R: Read + ?Sized>(
    stream: &mut R,
    auth: &Authenticator,
    expected_cluster_version: Option<i64>,
    secure: bool,
) -> Result<Handshake> {
    let frame = read_frame(stream)?;
    let reply = open_frame(auth, &frame.envelope, frame.value)?;

    if !reply.is_unsolicited() {
        return Err(KineticError::Handshake(
            "expected an unsolicited status frame".to_string(),
        ));
    }
    let status = reply
        .status()
        .cloned()
        .ok_or_else(|| KineticError::Handshake("handshake frame without status".to_string()))?;

    match status.code {
        StatusCode::Success => {}
        StatusCode::DeviceLocked if secure => {
            tracing::warn!("Device is locked, only unlock will be accepted");
        }
        code => {
            return Err(KineticError::Status {
                code,
                message: status.message,
            })
        }
    }

    let header = &reply.command.header;
    if let Some(expected) = expected_cluster_version {
        if expected != header.cluster_version {
            return Err(KineticError::ClusterVersionMismatch {
                actual: header.cluster_version,
                message: format!("expected cluster version {}", expected),
            });
        }
    }

    Ok(Handshake {
        connection_id: header.connection_id,
        cluster_version: header.cluster_version,
        status,
    })
}
