//! Synchronous strategy
//!
//! One outstanding request at a time: `submit` writes the request and reads
//! frames until its response arrives, all under the connection lock.
//! Completions and status hooks run after the lock is released, so they may
//! call back into the client.
//!
//! This is the only strategy that supports TLS and the zero-copy value
//! paths, since both need the whole socket.

use std::fs::File;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{KineticError, Result};
use crate::network::{
    Completion, Connection, ConnectionState, Correlator, DeferredValue, Delivery, Hooks, Sealed,
    StateCell,
};
use crate::operations::Request;
use crate::protocol::Reply;

use super::strategy::Strategy;

/// Blocking, one-request-at-a-time strategy
pub struct Synchronous {
    connection: Mutex<Option<Connection>>,
    correlator: Correlator,
    state: StateCell,
    tls: bool,
    connection_id: i64,
    cluster_version: Arc<AtomicI64>,
}

impl Strategy for Synchronous {
    fn connect(config: &ClientConfig, hooks: Hooks) -> Result<Self> {
        let connection = Connection::connect(config)?;
        let state = StateCell::new();
        state.set_connected()?;

        Ok(Self {
            tls: connection.is_tls(),
            connection_id: connection.sequencer().connection_id(),
            cluster_version: connection.sequencer().cluster_version_handle(),
            connection: Mutex::new(Some(connection)),
            correlator: Correlator::new(hooks),
            state,
        })
    }

    fn submit(&self, request: Request, completion: Option<Completion>) -> Result<()> {
        let mut deliveries = Vec::new();
        let result = self.submit_locked(request, completion, &mut deliveries);
        self.deliver(deliveries);
        result
    }

    fn close(&self, _drain: bool) -> Result<()> {
        // Taking the lock waits out any round trip in progress
        let deliveries = {
            let mut guard = self.connection.lock();
            self.state.begin_close();
            if let Some(connection) = guard.take() {
                tracing::debug!("Closing connection to {}", connection.peer_addr());
                connection.shutdown();
            }
            let deliveries = self.correlator.drain(&KineticError::ConnectionClosed);
            self.state.reset();
            deliveries
        };
        self.deliver(deliveries);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    fn connection_id(&self) -> i64 {
        self.connection_id
    }

    fn cluster_version(&self) -> i64 {
        self.cluster_version.load(Ordering::Acquire)
    }

    fn set_cluster_version(&self, version: i64) {
        self.cluster_version.store(version, Ordering::Release);
    }
}

impl Synchronous {
    fn submit_locked(
        &self,
        mut request: Request,
        completion: Option<Completion>,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        let mut guard = self.connection.lock();
        self.state.check_ready()?;
        let connection = guard.as_mut().ok_or(KineticError::NotConnected)?;

        let sealed = connection.seal(&mut request)?;
        if request.ack {
            let completion = completion.unwrap_or_else(|| Box::new(|_| {}));
            self.correlator.register(sealed.sequence, completion)?;
        }

        if let Err(err) = self.exchange(connection, &sealed, &request, deliveries) {
            deliveries.extend(self.fault(connection, err));
        }
        Ok(())
    }

    fn exchange(
        &self,
        connection: &mut Connection,
        sealed: &Sealed,
        request: &Request,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        connection.write(sealed, request.value.as_deref())?;
        while request.ack && self.correlator.is_pending(sealed.sequence) {
            let reply = connection.recv()?;
            deliveries.extend(self.correlator.resolve(reply)?);
        }
        Ok(())
    }

    /// Must be called without the connection lock held
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.correlator.deliver(delivery);
        }
    }

    #[must_use]
    fn fault(&self, connection: &Connection, err: KineticError) -> Vec<Delivery> {
        self.state.fault(err.clone());
        connection.shutdown();
        self.correlator.drain(&err)
    }

    /// Read frames until the one answering `sequence`
    fn recv_for(
        &self,
        connection: &mut Connection,
        sequence: u64,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<Reply> {
        loop {
            let reply = connection.recv()?;
            if reply.is_unsolicited() {
                deliveries.extend(self.correlator.resolve(reply)?);
                continue;
            }
            return expect_ack(reply, sequence);
        }
    }

    /// Send `request` and hand the response value to `consume` while it is
    /// still on the socket
    ///
    /// Any failure, including one raised by `consume`, faults the
    /// connection: the stream position is lost.
    pub(crate) fn exchange_deferred<T>(
        &self,
        request: Request,
        consume: impl FnOnce(DeferredValue) -> Result<T>,
    ) -> Result<(Reply, Option<T>)> {
        let mut deliveries = Vec::new();
        let result = self.exchange_deferred_locked(request, consume, &mut deliveries);
        self.deliver(deliveries);
        result
    }

    fn exchange_deferred_locked<T>(
        &self,
        mut request: Request,
        consume: impl FnOnce(DeferredValue) -> Result<T>,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<(Reply, Option<T>)> {
        let mut guard = self.connection.lock();
        self.state.check_ready()?;
        let connection = guard.as_mut().ok_or(KineticError::NotConnected)?;
        let sealed = connection.seal(&mut request)?;

        let result = (|| -> Result<(Reply, Option<T>)> {
            connection.write(&sealed, request.value.as_deref())?;
            loop {
                let (reply, value) = connection.recv_deferred()?;
                if reply.is_unsolicited() {
                    if let Some(value) = value {
                        value.discard()?;
                    }
                    deliveries.extend(self.correlator.resolve(reply)?);
                    continue;
                }
                let reply = expect_ack(reply, sealed.sequence)?;
                let consumed = match value {
                    Some(value) => Some(consume(value)?),
                    None => None,
                };
                return Ok((reply, consumed));
            }
        })();

        if let Err(err) = &result {
            deliveries.extend(self.fault(connection, err.clone()));
        }
        result
    }

    /// Send `request` with a `len`-byte value read from `file`
    pub(crate) fn exchange_from_file(
        &self,
        mut request: Request,
        file: &mut File,
        len: usize,
    ) -> Result<Reply> {
        let mut deliveries = Vec::new();
        let result = (|| -> Result<Reply> {
            let mut guard = self.connection.lock();
            self.state.check_ready()?;
            let connection = guard.as_mut().ok_or(KineticError::NotConnected)?;
            let sealed = connection.seal(&mut request)?;

            let result = connection
                .write_from_file(&sealed, file, len)
                .and_then(|_| self.recv_for(connection, sealed.sequence, &mut deliveries));

            if let Err(err) = &result {
                deliveries.extend(self.fault(connection, err.clone()));
            }
            result
        })();
        self.deliver(deliveries);
        result
    }
}

fn expect_ack(reply: Reply, sequence: u64) -> Result<Reply> {
    match reply.ack_sequence() {
        Some(ack) if ack == sequence => Ok(reply),
        other => Err(KineticError::Protocol(format!(
            "expected response to sequence {}, got {:?}",
            sequence, other
        ))),
    }
}
