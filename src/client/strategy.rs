//! Concurrency strategy seam
//!
//! A strategy owns one device connection and decides how requests reach it:
//! one round trip at a time, or pipelined through worker threads.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::{Completion, ConnectionState, Hooks};
use crate::operations::Request;

/// How a [`Client`](super::Client) drives its connection
pub trait Strategy: Send + Sync + 'static {
    /// Connect and handshake
    fn connect(config: &ClientConfig, hooks: Hooks) -> Result<Self>
    where
        Self: Sized;

    /// Put a request on the wire
    ///
    /// When `Ok` is returned the completion (if any) runs exactly once,
    /// with the response or the error that replaced it. When `Err` is
    /// returned the request was never sent and the completion is dropped.
    /// Requests with `ack == false` expect no response.
    fn submit(&self, request: Request, completion: Option<Completion>) -> Result<()>;

    /// Shut down. With `drain`, outstanding requests finish first.
    fn close(&self, drain: bool) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn is_tls(&self) -> bool;

    fn connection_id(&self) -> i64;

    fn cluster_version(&self) -> i64;

    /// Use a new cluster version for subsequent requests
    fn set_cluster_version(&self, version: i64);
}
