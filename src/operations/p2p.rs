//! Peer-to-peer push
//!
//! A push asks the device to copy keys to a peer. A piped push chains the
//! copy through several peers, one nesting level per hop:
//!
//! ```text
//!   peers = [B, C, D]
//!
//!   P2pOperation(peer B)
//!     └── item k ── next: P2pOperation(peer C)
//!                           └── item k ── next: P2pOperation(peer D)
//!                                                 └── item k
//! ```
//!
//! The device pushes `k` to B and asks B to run the nested operation, which
//! pushes `k` on to C, and so on.

use crate::entry::PushKey;
use crate::error::{KineticError, Result};
use crate::protocol::{P2pItem, P2pOperation, Peer};

use super::keyvalue::validate_key;

/// Build a single-hop push of `keys` to `peer`
pub fn build_push(keys: &[PushKey], peer: Peer) -> Result<P2pOperation> {
    let operations = keys
        .iter()
        .map(|key| {
            validate_key(&key.key)?;
            Ok(P2pItem {
                key: key.key.clone(),
                version: key.version.clone(),
                new_key: key.new_key.clone(),
                force: key.force,
                next: None,
                status: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(P2pOperation {
        peer,
        operations,
        all_child_operations_succeeded: None,
    })
}

/// Build a piped push of `keys` through `peers`, in order
///
/// Renaming keys along a pipe is not supported; `new_key` is dropped with a
/// warning.
pub fn build_piped_push(keys: &[PushKey], peers: &[Peer]) -> Result<P2pOperation> {
    let (first, rest) = peers.split_first().ok_or_else(|| {
        KineticError::InvalidArgument("piped push needs at least one peer".to_string())
    })?;

    let mut operations = Vec::with_capacity(keys.len());
    for key in keys {
        validate_key(&key.key)?;
        if key.new_key.is_some() {
            tracing::warn!(
                "Ignoring new key for {:?} on piped push",
                String::from_utf8_lossy(&key.key)
            );
        }
        operations.push(P2pItem {
            key: key.key.clone(),
            version: key.version.clone(),
            new_key: None,
            force: key.force,
            next: chain(key, rest),
            status: None,
        });
    }

    Ok(P2pOperation {
        peer: first.clone(),
        operations,
        all_child_operations_succeeded: None,
    })
}

/// The nested operation relaying `key` through `peers`
fn chain(key: &PushKey, peers: &[Peer]) -> Option<Box<P2pOperation>> {
    let (peer, rest) = peers.split_first()?;
    Some(Box::new(P2pOperation {
        peer: peer.clone(),
        operations: vec![P2pItem {
            key: key.key.clone(),
            version: key.version.clone(),
            new_key: None,
            force: key.force,
            next: chain(key, rest),
            status: None,
        }],
        all_child_operations_succeeded: None,
    }))
}

/// Depth of the relay chain below `operation` (0 for a plain push)
pub fn hops(operation: &P2pOperation) -> usize {
    operation
        .operations
        .iter()
        .filter_map(|item| item.next.as_deref())
        .map(|next| 1 + hops(next))
        .max()
        .unwrap_or(0)
}
