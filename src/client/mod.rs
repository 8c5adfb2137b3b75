//! Client Module
//!
//! The public operation surface.
//!
//! ## Composition
//! ```text
//!   Client<S: Strategy>
//!     ├── config + hooks
//!     ├── strategy: Synchronous | Threaded   (owns connection + pending table)
//!     └── batch id counter
//!
//!   AsyncClient                               (tokio tasks on a caller runtime)
//! ```
//!
//! Every operation is built by the operation codec, submitted through the
//! strategy, and parsed back once its completion fires. Blocking calls wait
//! on a one-shot channel; the `*_async` variants return a [`Pending`].

mod batch;
mod cooperative;
mod pipeline;
mod strategy;
mod sync;
mod threaded;

use std::fs::File;
use std::io::{Seek, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use parking_lot::RwLock;

use crate::config::ClientConfig;
use crate::entry::{Entry, EntryMetadata, KeyRange, PushKey, MAX_KEY_SIZE};
use crate::error::{KineticError, Result};
use crate::network::{ConnectionState, Hooks};
use crate::operations::{
    acl_update, build_piped_push, build_push, erase_pin_update, lock_pin_update, require_pin,
    require_tls, DeleteOptions, LogReport, Operation, Outcome, PutOptions,
};
use crate::protocol::{Acl, LogType, P2pItem, Peer, PinOpKind};

pub use batch::Batch;
pub use cooperative::{AsyncBatch, AsyncClient};
pub use pipeline::{Ordered, RangeIter, ReorderBuffer};
pub use strategy::Strategy;
pub use sync::Synchronous;
pub use threaded::Threaded;

/// Blocking client, one request at a time
pub type BlockingClient = Client<Synchronous>;

/// Pipelined client on a writer and a reader thread
pub type ThreadedClient = Client<Threaded>;

// =============================================================================
// Pending
// =============================================================================

/// Result of a submitted operation, available once its response arrives
pub struct Pending<T> {
    rx: Receiver<Result<Outcome>>,
    convert: fn(Outcome) -> Result<T>,
}

impl<T> Pending<T> {
    /// Block until the result is available
    ///
    /// Fails with [`KineticError::BlockingInCompletion`] when called from a
    /// completion on a threaded connection's I/O thread before the result
    /// has arrived.
    pub fn wait(self) -> Result<T> {
        if self.rx.is_empty() && threaded::on_io_thread() {
            return Err(KineticError::BlockingInCompletion);
        }
        match self.rx.recv() {
            Ok(result) => result.and_then(self.convert),
            Err(_) => Err(KineticError::ConnectionClosed),
        }
    }

    /// Wait at most `timeout`; gives the handle back if nothing arrived
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result.and_then(self.convert)),
            Err(channel::RecvTimeoutError::Timeout) => Err(self),
            Err(channel::RecvTimeoutError::Disconnected) => Ok(Err(KineticError::ConnectionClosed)),
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

// =============================================================================
// Client
// =============================================================================

/// Client for one device, generic over its concurrency strategy
pub struct Client<S: Strategy> {
    config: ClientConfig,
    hooks: Hooks,
    strategy: RwLock<Option<Arc<S>>>,
    next_batch_id: AtomicU32,
}

impl<S: Strategy> Client<S> {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect to the device described by `config`
    pub fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with_hooks(config, Hooks::default())
    }

    pub fn connect_with_hooks(config: ClientConfig, hooks: Hooks) -> Result<Self> {
        let strategy = S::connect(&config, hooks.clone())?;
        Ok(Self {
            config,
            hooks,
            strategy: RwLock::new(Some(Arc::new(strategy))),
            next_batch_id: AtomicU32::new(1),
        })
    }

    /// Drop the current connection, if any, and make a fresh one
    pub fn reconnect(&self) -> Result<()> {
        self.close()?;
        let strategy = S::connect(&self.config, self.hooks.clone())?;
        *self.strategy.write() = Some(Arc::new(strategy));
        Ok(())
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.shutdown(false)
    }

    /// Close after outstanding requests have completed
    pub fn close_gracefully(&self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&self, drain: bool) -> Result<()> {
        let strategy = self.strategy.write().take();
        match strategy {
            Some(strategy) => strategy.close(drain),
            None => Ok(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.strategy.read() {
            Some(strategy) => strategy.state(),
            None => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    pub fn connection_id(&self) -> Result<i64> {
        Ok(self.strategy()?.connection_id())
    }

    pub fn cluster_version(&self) -> Result<i64> {
        Ok(self.strategy()?.cluster_version())
    }

    pub(crate) fn strategy(&self) -> Result<Arc<S>> {
        self.strategy
            .read()
            .as_ref()
            .cloned()
            .ok_or(KineticError::NotConnected)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit an operation; `on_done` runs once with its typed result
    ///
    /// `on_done` may call back into the client. On the synchronous strategy
    /// it runs on the submitting thread after the connection is released.
    /// On the threaded strategy it runs on the connection's reader thread:
    /// submitting more work is fine, but waiting on a result there fails
    /// with [`KineticError::BlockingInCompletion`].
    pub fn submit_with(
        &self,
        op: Operation,
        on_done: impl FnOnce(Result<Outcome>) + Send + 'static,
    ) -> Result<()> {
        let request = op.build()?;
        let completion = Box::new(move |result| on_done(op.complete(result)));
        self.strategy()?.submit(request, Some(completion))
    }

    /// Submit an operation without waiting for it
    pub fn submit(&self, op: Operation) -> Result<Pending<Outcome>> {
        self.submit_as(op, Ok)
    }

    fn submit_as<T>(&self, op: Operation, convert: fn(Outcome) -> Result<T>) -> Result<Pending<T>> {
        let (tx, rx) = channel::bounded(1);
        self.submit_with(op, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(Pending { rx, convert })
    }

    /// Submit and wait
    pub fn execute(&self, op: Operation) -> Result<Outcome> {
        self.submit(op)?.wait()
    }

    // =========================================================================
    // Key/Value
    // =========================================================================

    pub fn noop(&self) -> Result<()> {
        self.execute(Operation::Noop)?.into_done()
    }

    /// Flush all buffered writes to persistent media
    pub fn flush(&self) -> Result<()> {
        self.execute(Operation::Flush)?.into_done()
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<()> {
        self.put_with(key, value, PutOptions::default())
    }

    pub fn put_with(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<()> {
        self.put_async(key, value, options)?.wait()
    }

    pub fn put_async(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<Pending<()>> {
        let op = Operation::Put {
            key: key.as_ref().to_vec(),
            value: value.into(),
            options,
        };
        self.submit_as(op, Outcome::into_done)
    }

    /// Fetch an entry; `None` when the key does not exist
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        self.get_async(key)?.wait()
    }

    pub fn get_async(&self, key: impl AsRef<[u8]>) -> Result<Pending<Option<Entry>>> {
        let op = Operation::Get {
            key: key.as_ref().to_vec(),
        };
        self.submit_as(op, Outcome::into_entry)
    }

    /// Fetch an entry's metadata without its value
    pub fn get_metadata(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetMetadata {
            key: key.as_ref().to_vec(),
        };
        self.execute(op)?.into_entry()
    }

    /// Delete a key; `false` when it did not exist
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.delete_with(key, DeleteOptions::default())
    }

    pub fn delete_with(&self, key: impl AsRef<[u8]>, options: DeleteOptions) -> Result<bool> {
        self.delete_async(key, options)?.wait()
    }

    pub fn delete_async(
        &self,
        key: impl AsRef<[u8]>,
        options: DeleteOptions,
    ) -> Result<Pending<bool>> {
        let op = Operation::Delete {
            key: key.as_ref().to_vec(),
            options,
        };
        self.submit_as(op, Outcome::into_deleted)
    }

    /// Entry with the smallest key greater than `key`
    pub fn get_next(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetNext {
            key: key.as_ref().to_vec(),
        };
        self.execute(op)?.into_entry()
    }

    /// Entry with the largest key smaller than `key`
    pub fn get_previous(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetPrevious {
            key: key.as_ref().to_vec(),
        };
        self.execute(op)?.into_entry()
    }

    /// Version of the stored entry
    pub fn get_version(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let op = Operation::GetVersion {
            key: key.as_ref().to_vec(),
        };
        self.execute(op)?.into_version()
    }

    // =========================================================================
    // Ranges
    // =========================================================================

    /// Keys in `range`, ascending, at most `max_returned`
    pub fn get_key_range(&self, range: &KeyRange, max_returned: u32) -> Result<Vec<Vec<u8>>> {
        self.get_key_range_with(range, max_returned, false)
    }

    /// Keys in `range`; descending from the end bound when `reverse`
    pub fn get_key_range_with(
        &self,
        range: &KeyRange,
        max_returned: u32,
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self.get_key_range_async(range, max_returned, reverse)?.wait()
    }

    pub fn get_key_range_async(
        &self,
        range: &KeyRange,
        max_returned: u32,
        reverse: bool,
    ) -> Result<Pending<Vec<Vec<u8>>>> {
        let op = Operation::GetKeyRange {
            range: range.clone(),
            max_returned,
            reverse,
        };
        self.submit_as(op, Outcome::into_keys)
    }

    /// Every key from `start_key` to the end of key space
    pub fn get_keys_from(&self, start_key: impl Into<Vec<u8>>, max_returned: u32) -> Result<Vec<Vec<u8>>> {
        let range = KeyRange::new(start_key, vec![0xFF; MAX_KEY_SIZE]);
        self.get_key_range(&range, max_returned)
    }

    /// Lazily iterate the entries in `range`
    pub fn get_range(&self, range: KeyRange) -> RangeIter<'_, S> {
        RangeIter::new(
            self,
            range,
            self.config.range_page_size,
            self.config.range_prefetch,
        )
    }

    // =========================================================================
    // Pipelined bulk helpers
    // =========================================================================

    /// Fetch many keys with up to `depth` requests in flight, in input order
    ///
    /// `None` uses the configured `pipeline_depth`.
    pub fn get_keys<I>(&self, keys: I, depth: Option<usize>) -> Ordered<'_, S, Option<Entry>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let ops: Vec<Operation> = keys
            .into_iter()
            .map(|key| Operation::Get {
                key: key.as_ref().to_vec(),
            })
            .collect();
        Ordered::new(self, ops, self.depth(depth), Outcome::into_entry)
    }

    /// Delete many keys with up to `depth` requests in flight, in input order
    ///
    /// `None` uses the configured `pipeline_depth`.
    pub fn delete_keys<I>(&self, keys: I, depth: Option<usize>) -> Ordered<'_, S, bool>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let ops: Vec<Operation> = keys
            .into_iter()
            .map(|key| Operation::Delete {
                key: key.as_ref().to_vec(),
                options: DeleteOptions::default(),
            })
            .collect();
        Ordered::new(self, ops, self.depth(depth), Outcome::into_deleted)
    }

    /// Store many entries with up to `depth` requests in flight
    /// (`None` uses the configured `pipeline_depth`)
    ///
    /// Returns the first failure; later puts may still have been applied.
    pub fn put_entries<I>(&self, entries: I, depth: Option<usize>) -> Result<usize>
    where
        I: IntoIterator<Item = Entry>,
    {
        let ops: Vec<Operation> = entries
            .into_iter()
            .map(|entry| Operation::Put {
                value: entry.value.unwrap_or_default(),
                key: entry.key,
                options: PutOptions::default(),
            })
            .collect();
        let count = ops.len();
        for result in Ordered::new(self, ops, self.depth(depth), Outcome::into_done) {
            result?;
        }
        Ok(count)
    }

    fn depth(&self, depth: Option<usize>) -> usize {
        depth.unwrap_or(self.config.pipeline_depth)
    }

    // =========================================================================
    // Peer-to-peer
    // =========================================================================

    /// Ask the device to copy `keys` to `peer`
    pub fn push<K: Into<PushKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        peer: Peer,
    ) -> Result<Vec<P2pItem>> {
        let keys: Vec<PushKey> = keys.into_iter().map(Into::into).collect();
        let request = build_push(&keys, peer)?;
        self.execute(Operation::Push { request })?.into_pushed()
    }

    /// Ask the device to relay `keys` through `peers`, in order
    pub fn piped_push<K: Into<PushKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        peers: &[Peer],
    ) -> Result<Vec<P2pItem>> {
        let keys: Vec<PushKey> = keys.into_iter().map(Into::into).collect();
        let request = build_piped_push(&keys, peers)?;
        self.execute(Operation::Push { request })?.into_pushed()
    }

    /// Push `keys` to `peer` in requests of `chunk` keys each
    pub fn push_keys<K: Into<PushKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        peer: Peer,
        chunk: usize,
    ) -> Result<Vec<P2pItem>> {
        let keys: Vec<PushKey> = keys.into_iter().map(Into::into).collect();
        let pending = keys
            .chunks(chunk.max(1))
            .map(|chunk| {
                let request = build_push(chunk, peer.clone())?;
                self.submit_as(Operation::Push { request }, Outcome::into_pushed)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut items = Vec::with_capacity(keys.len());
        for pending in pending {
            items.extend(pending.wait()?);
        }
        Ok(items)
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Start a batch of puts and deletes applied as one unit
    pub fn begin_batch(&self) -> Result<Batch<'_, S>> {
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.execute(Operation::StartBatch { batch_id })?.into_done()?;
        Ok(Batch::new(self, batch_id))
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Fetch device logs
    pub fn get_log(&self, types: &[LogType]) -> Result<LogReport> {
        let op = Operation::GetLog {
            types: types.to_vec(),
            device_name: None,
        };
        self.execute(op)?.into_log()
    }

    /// Fetch a vendor-specific device log by name
    pub fn get_device_log(&self, name: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let op = Operation::GetLog {
            types: vec![LogType::Device],
            device_name: Some(name.as_ref().to_vec()),
        };
        Ok(self.execute(op)?.into_log()?.device)
    }

    /// Move the device to a new cluster version and follow it
    pub fn set_cluster_version(&self, version: i64) -> Result<()> {
        self.execute(Operation::SetClusterVersion { version })?
            .into_done()?;
        self.strategy()?.set_cluster_version(version);
        tracing::debug!("Cluster version is now {}", version);
        Ok(())
    }

    pub fn update_firmware(&self, image: impl Into<Bytes>) -> Result<()> {
        let op = Operation::UpdateFirmware {
            image: image.into(),
        };
        self.execute(op)?.into_done()
    }

    pub fn lock_device(&self, pin: Option<&[u8]>) -> Result<()> {
        self.pin_op(PinOpKind::Lock, pin)
    }

    pub fn unlock_device(&self, pin: Option<&[u8]>) -> Result<()> {
        self.pin_op(PinOpKind::Unlock, pin)
    }

    /// Erase all data (ISE)
    pub fn erase_device(&self, pin: Option<&[u8]>) -> Result<()> {
        self.pin_op(PinOpKind::Erase, pin)
    }

    pub fn instant_secure_erase(&self, pin: Option<&[u8]>) -> Result<()> {
        self.pin_op(PinOpKind::SecureErase, pin)
    }

    fn pin_op(&self, kind: PinOpKind, pin: Option<&[u8]>) -> Result<()> {
        require_tls(self.strategy()?.is_tls())?;
        let pin = require_pin(pin, self.config.pin.as_deref())?;
        self.execute(Operation::PinOp { kind, pin })?.into_done()
    }

    pub fn set_erase_pin(&self, old_pin: Option<&[u8]>, new_pin: &[u8]) -> Result<()> {
        require_tls(self.strategy()?.is_tls())?;
        let security = erase_pin_update(old_pin, new_pin);
        self.execute(Operation::Security { security })?.into_done()
    }

    pub fn set_lock_pin(&self, old_pin: Option<&[u8]>, new_pin: &[u8]) -> Result<()> {
        require_tls(self.strategy()?.is_tls())?;
        let security = lock_pin_update(old_pin, new_pin);
        self.execute(Operation::Security { security })?.into_done()
    }

    /// Replace the device's access control list
    pub fn set_acls(&self, acls: Vec<Acl>) -> Result<()> {
        require_tls(self.strategy()?.is_tls())?;
        let security = acl_update(acls);
        self.execute(Operation::Security { security })?.into_done()
    }
}

impl<S: Strategy> Drop for Client<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Error closing client: {}", e);
        }
    }
}

// =============================================================================
// Zero-copy value paths (synchronous strategy only)
// =============================================================================

impl Client<Synchronous> {
    /// Stream an entry's value into `writer` without buffering it whole
    pub fn get_to_writer<W: Write + ?Sized>(
        &self,
        key: impl AsRef<[u8]>,
        writer: &mut W,
    ) -> Result<Option<EntryMetadata>> {
        let op = Operation::Get {
            key: key.as_ref().to_vec(),
        };
        let request = op.build()?;
        let result = self
            .strategy()?
            .exchange_deferred(request, |value| value.copy_to(writer));
        Self::deferred_metadata(&op, result)
    }

    /// Write an entry's value into `file`, splicing when configured
    pub fn get_to_file(&self, key: impl AsRef<[u8]>, file: &mut File) -> Result<Option<EntryMetadata>> {
        let op = Operation::Get {
            key: key.as_ref().to_vec(),
        };
        let request = op.build()?;
        let result = self
            .strategy()?
            .exchange_deferred(request, |value| value.splice_to(file));
        Self::deferred_metadata(&op, result)
    }

    fn deferred_metadata(
        op: &Operation,
        result: Result<(crate::protocol::Reply, Option<u64>)>,
    ) -> Result<Option<EntryMetadata>> {
        let reply = result.map(|(reply, _)| reply);
        Ok(op.complete(reply)?.into_entry()?.map(|entry| entry.metadata))
    }

    /// Store the rest of `file` (from its current position) under `key`
    pub fn put_from_file(
        &self,
        key: impl AsRef<[u8]>,
        file: &mut File,
        options: PutOptions,
    ) -> Result<()> {
        let len = file.metadata()?.len().saturating_sub(file.stream_position()?) as usize;
        let op = Operation::PutStreamed {
            key: key.as_ref().to_vec(),
            len,
            options,
        };
        let request = op.build()?;
        let result = self.strategy()?.exchange_from_file(request, file, len);
        op.complete(result)?.into_done()
    }
}
