//! Cooperative strategy
//!
//! The send and receive loops are tasks on a caller-supplied tokio runtime.
//! On a current-thread runtime they share one thread and interleave at
//! their await points.
//!
//! ```text
//!   async callers ──► mpsc queue ──► send task ──► FramedWrite ──► socket
//!                                     │ permit (max_outstanding)
//!                                     │ seal, register, send, yield
//!                                     ▼
//!                               pending table ◄── recv task ◄── FramedRead
//! ```
//!
//! A permit is taken for every acknowledged request and given back when its
//! completion runs, so the send task parks once `max_outstanding` responses
//! are owed.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::ClientConfig;
use crate::entry::{Entry, KeyRange, PushKey};
use crate::error::{KineticError, Result};
use crate::network::{
    open_frame, Completion, Connection, ConnectionState, Correlator, Hooks, Sequencer, StateCell,
};
use crate::operations::{
    build_piped_push, build_push, DeleteOptions, LogReport, Operation, Outcome, PutOptions,
    Request,
};
use crate::protocol::{Authenticator, Frame, FrameCodec, LogType, P2pItem, Peer};

use super::pipeline::ReorderBuffer;

enum Job {
    Send(Request, Option<Completion>),
    Stop,
}

// =============================================================================
// Shared state
// =============================================================================

struct Shared {
    correlator: Correlator,
    state: StateCell,
    permits: Arc<Semaphore>,
    stop: watch::Sender<bool>,
    socket_timeout: Option<Duration>,
}

impl Shared {
    fn fault(&self, err: KineticError) {
        if self.state.fault(err.clone()) {
            self.permits.close();
            let _ = self.stop.send(true);
        }
        self.correlator.fail_all(&err);
    }

    fn faulted(&self) -> Option<KineticError> {
        self.state
            .fault_error()
            .map(|err| KineticError::ConnectionFaulted(Box::new(err)))
    }
}

// =============================================================================
// Range cursor
// =============================================================================

/// Position of a lazy range walk
struct RangeCursor {
    range: KeyRange,
    page_size: u32,
    prefetch: usize,
    keys: VecDeque<Vec<u8>>,
    fetches: VecDeque<oneshot::Receiver<Result<Outcome>>>,
    exhausted: bool,
}

impl RangeCursor {
    /// Queue a listed page and move the start past its last key
    fn advance(&mut self, keys: Vec<Vec<u8>>) {
        if keys.len() < self.page_size as usize {
            self.exhausted = true;
        }
        match keys.last() {
            Some(last) => {
                if last == &self.range.end_key {
                    self.exhausted = true;
                }
                self.range.start_key = last.clone();
                self.range.start_inclusive = false;
            }
            None => self.exhausted = true,
        }
        self.keys.extend(keys);
    }
}

// =============================================================================
// AsyncClient
// =============================================================================

/// Client whose I/O runs as tasks on a tokio runtime
pub struct AsyncClient {
    config: ClientConfig,
    jobs: mpsc::Sender<Job>,
    shared: Arc<Shared>,
    send_task: Mutex<Option<JoinHandle<()>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    connection_id: i64,
    cluster_version: Arc<AtomicI64>,
    next_batch_id: AtomicU32,
}

impl AsyncClient {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect and start the send and receive tasks on `handle`
    ///
    /// The socket connect and handshake run on the runtime's blocking pool.
    pub async fn connect(config: ClientConfig, hooks: Hooks, handle: Handle) -> Result<Self> {
        if config.tls.is_some() {
            return Err(KineticError::Config(
                "TLS is only supported by the synchronous strategy".to_string(),
            ));
        }
        config.validate()?;

        let connect_config = config.clone();
        let connection = handle
            .spawn_blocking(move || Connection::connect(&connect_config))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        let peer = connection.peer_addr();
        let (tcp, sequencer, auth) = connection.into_parts()?;
        let connection_id = sequencer.connection_id();
        let cluster_version = sequencer.cluster_version_handle();

        tcp.set_read_timeout(None)?;
        tcp.set_write_timeout(None)?;
        tcp.set_nonblocking(true)?;
        let stream = {
            let _runtime = handle.enter();
            tokio::net::TcpStream::from_std(tcp)?
        };
        let (read_half, write_half) = stream.into_split();

        let (stop, stopped) = watch::channel(false);
        let shared = Arc::new(Shared {
            correlator: Correlator::new(hooks),
            state: StateCell::new(),
            permits: Arc::new(Semaphore::new(config.max_outstanding.max(1))),
            stop,
            socket_timeout: config.socket_timeout,
        });
        shared.state.set_connected()?;

        let (jobs, queue) = mpsc::channel(config.queue_capacity.max(1));
        let writer = FramedWrite::new(write_half, FrameCodec::new());
        let reader = FramedRead::new(read_half, FrameCodec::new());

        let send_task = handle.spawn(send_loop(writer, sequencer, queue, shared.clone()));
        let recv_task = handle.spawn(recv_loop(reader, auth, stopped, shared.clone()));
        tracing::debug!("Cooperative client connected to {}", peer);

        Ok(Self {
            config,
            jobs,
            shared,
            send_task: Mutex::new(Some(send_task)),
            recv_task: Mutex::new(Some(recv_task)),
            connection_id,
            cluster_version,
            next_batch_id: AtomicU32::new(1),
        })
    }

    /// Stop both tasks. With `drain`, outstanding requests get up to the
    /// socket timeout to complete first.
    pub async fn close(&self, drain: bool) -> Result<()> {
        let previous = self.shared.state.begin_close();
        if matches!(previous, ConnectionState::Disconnected) {
            return Ok(());
        }

        let _ = self.jobs.send(Job::Stop).await;
        let send_task = self.send_task.lock().take();
        if let Some(task) = send_task {
            let _ = task.await;
        }

        if drain {
            let wait = self.shared.socket_timeout.unwrap_or(Duration::from_secs(5));
            let drained = tokio::time::timeout(wait, async {
                while !self.shared.correlator.is_idle() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    "Closing with {} requests still outstanding",
                    self.shared.correlator.pending_count()
                );
            }
        }

        let _ = self.shared.stop.send(true);
        let recv_task = self.recv_task.lock().take();
        if let Some(task) = recv_task {
            let _ = task.await;
        }
        self.shared.permits.close();
        self.shared.correlator.fail_all(&KineticError::ConnectionClosed);
        self.shared.state.reset();
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    pub fn cluster_version(&self) -> i64 {
        self.cluster_version.load(Ordering::Acquire)
    }

    /// Requests currently owed a response
    pub fn in_flight(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queue an operation; `on_done` runs once with its typed result
    pub async fn submit_with(
        &self,
        op: Operation,
        on_done: impl FnOnce(Result<Outcome>) + Send + 'static,
    ) -> Result<()> {
        let request = op.build()?;
        let completion: Completion = Box::new(move |result| on_done(op.complete(result)));
        self.enqueue(request, Some(completion)).await
    }

    async fn enqueue(&self, request: Request, completion: Option<Completion>) -> Result<()> {
        self.shared.state.check_ready()?;
        self.jobs
            .send(Job::Send(request, completion))
            .await
            .map_err(|_| KineticError::ConnectionClosed)
    }

    /// Submit and wait for the result
    pub async fn execute(&self, op: Operation) -> Result<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.submit_with(op, move |result| {
            let _ = tx.send(result);
        })
        .await?;
        rx.await.map_err(|_| KineticError::ConnectionClosed)?
    }

    // =========================================================================
    // Key/Value
    // =========================================================================

    pub async fn noop(&self) -> Result<()> {
        self.execute(Operation::Noop).await?.into_done()
    }

    pub async fn flush(&self) -> Result<()> {
        self.execute(Operation::Flush).await?.into_done()
    }

    pub async fn put(&self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<()> {
        self.put_with(key, value, PutOptions::default()).await
    }

    pub async fn put_with(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<()> {
        let op = Operation::Put {
            key: key.as_ref().to_vec(),
            value: value.into(),
            options,
        };
        self.execute(op).await?.into_done()
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::Get {
            key: key.as_ref().to_vec(),
        };
        self.execute(op).await?.into_entry()
    }

    pub async fn get_metadata(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetMetadata {
            key: key.as_ref().to_vec(),
        };
        self.execute(op).await?.into_entry()
    }

    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.delete_with(key, DeleteOptions::default()).await
    }

    pub async fn delete_with(&self, key: impl AsRef<[u8]>, options: DeleteOptions) -> Result<bool> {
        let op = Operation::Delete {
            key: key.as_ref().to_vec(),
            options,
        };
        self.execute(op).await?.into_deleted()
    }

    pub async fn get_next(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetNext {
            key: key.as_ref().to_vec(),
        };
        self.execute(op).await?.into_entry()
    }

    pub async fn get_previous(&self, key: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let op = Operation::GetPrevious {
            key: key.as_ref().to_vec(),
        };
        self.execute(op).await?.into_entry()
    }

    pub async fn get_version(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let op = Operation::GetVersion {
            key: key.as_ref().to_vec(),
        };
        self.execute(op).await?.into_version()
    }

    pub async fn get_key_range(
        &self,
        range: &KeyRange,
        max_returned: u32,
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let op = Operation::GetKeyRange {
            range: range.clone(),
            max_returned,
            reverse,
        };
        self.execute(op).await?.into_keys()
    }

    // =========================================================================
    // Pipelined helpers
    // =========================================================================

    /// Run `ops` with up to `depth` in flight; results come back in input order
    async fn ordered<T>(
        &self,
        ops: Vec<Operation>,
        depth: Option<usize>,
        convert: fn(Outcome) -> Result<T>,
    ) -> Vec<Result<T>> {
        let total = ops.len();
        let depth = depth.unwrap_or(self.config.pipeline_depth).max(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut buffer = ReorderBuffer::new();
        let mut results = Vec::with_capacity(total);
        let mut ops = ops.into_iter().enumerate();
        let mut in_flight = 0;

        while results.len() < total {
            while in_flight < depth {
                let Some((ordinal, op)) = ops.next() else { break };
                let tx = tx.clone();
                let submitted = self
                    .submit_with(op, move |result| {
                        let _ = tx.send((ordinal, result));
                    })
                    .await;
                match submitted {
                    Ok(()) => in_flight += 1,
                    Err(err) => buffer.insert(ordinal, Err(err)),
                }
            }

            while let Some(result) = buffer.pop_ready() {
                results.push(result.and_then(convert));
            }
            if results.len() == total || in_flight == 0 {
                continue;
            }

            match rx.recv().await {
                Some((ordinal, result)) => {
                    in_flight -= 1;
                    buffer.insert(ordinal, result);
                }
                None => break,
            }
        }
        results
    }

    /// Fetch many keys with up to `depth` requests in flight, in input order
    ///
    /// `None` uses the configured `pipeline_depth`.
    pub async fn get_keys<I>(&self, keys: I, depth: Option<usize>) -> Vec<Result<Option<Entry>>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let ops = keys
            .into_iter()
            .map(|key| Operation::Get {
                key: key.as_ref().to_vec(),
            })
            .collect();
        self.ordered(ops, depth, Outcome::into_entry).await
    }

    /// Delete many keys with up to `depth` requests in flight, in input order
    ///
    /// `None` uses the configured `pipeline_depth`.
    pub async fn delete_keys<I>(&self, keys: I, depth: Option<usize>) -> Vec<Result<bool>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let ops = keys
            .into_iter()
            .map(|key| Operation::Delete {
                key: key.as_ref().to_vec(),
                options: DeleteOptions::default(),
            })
            .collect();
        self.ordered(ops, depth, Outcome::into_deleted).await
    }

    /// Store many entries with up to `depth` requests in flight
    /// (`None` uses the configured `pipeline_depth`)
    pub async fn put_entries<I>(&self, entries: I, depth: Option<usize>) -> Result<usize>
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
        for result in self.ordered(ops, depth, Outcome::into_done).await {
            result?;
        }
        Ok(count)
    }

    /// Lazily walk every entry in `range`, in key order
    ///
    /// Keys are listed a page at a time; the last key of a page becomes the
    /// exclusive start of the next. Up to `range_prefetch` fetches run ahead
    /// of the consumer. Keys removed between listing and fetching are
    /// skipped. The stream ends after the first error.
    pub fn get_range(&self, range: KeyRange) -> impl Stream<Item = Result<Entry>> + '_ {
        let cursor = RangeCursor {
            range,
            page_size: self.config.range_page_size.max(1),
            prefetch: self.config.range_prefetch.max(1),
            keys: VecDeque::new(),
            fetches: VecDeque::new(),
            exhausted: false,
        };
        stream::try_unfold(cursor, move |cursor| self.next_in_range(cursor))
    }

    async fn next_in_range(&self, mut cursor: RangeCursor) -> Result<Option<(Entry, RangeCursor)>> {
        loop {
            self.fill_range(&mut cursor).await?;
            let Some(fetch) = cursor.fetches.pop_front() else {
                return Ok(None);
            };
            let outcome = fetch.await.map_err(|_| KineticError::ConnectionClosed)??;
            match outcome.into_entry()? {
                Some(entry) => return Ok(Some((entry, cursor))),
                None => tracing::debug!("Skipping key removed during iteration"),
            }
        }
    }

    async fn fill_range(&self, cursor: &mut RangeCursor) -> Result<()> {
        while cursor.fetches.len() < cursor.prefetch {
            match cursor.keys.pop_front() {
                Some(key) => {
                    let (tx, rx) = oneshot::channel();
                    self.submit_with(Operation::Get { key }, move |result| {
                        let _ = tx.send(result);
                    })
                    .await?;
                    cursor.fetches.push_back(rx);
                }
                None if cursor.exhausted => return Ok(()),
                None => {
                    let keys = self
                        .get_key_range(&cursor.range, cursor.page_size, false)
                        .await?;
                    tracing::trace!("Range page of {} keys", keys.len());
                    cursor.advance(keys);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Peer-to-peer
    // =========================================================================

    pub async fn push<K: Into<PushKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        peer: Peer,
    ) -> Result<Vec<P2pItem>> {
        let keys: Vec<PushKey> = keys.into_iter().map(Into::into).collect();
        let request = build_push(&keys, peer)?;
        self.execute(Operation::Push { request }).await?.into_pushed()
    }

    pub async fn piped_push<K: Into<PushKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        peers: &[Peer],
    ) -> Result<Vec<P2pItem>> {
        let keys: Vec<PushKey> = keys.into_iter().map(Into::into).collect();
        let request = build_piped_push(&keys, peers)?;
        self.execute(Operation::Push { request }).await?.into_pushed()
    }

    // =========================================================================
    // Administration
    // =========================================================================

    pub async fn get_log(&self, types: &[LogType]) -> Result<LogReport> {
        let op = Operation::GetLog {
            types: types.to_vec(),
            device_name: None,
        };
        self.execute(op).await?.into_log()
    }

    pub async fn set_cluster_version(&self, version: i64) -> Result<()> {
        self.execute(Operation::SetClusterVersion { version })
            .await?
            .into_done()?;
        self.cluster_version.store(version, Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // Batches
    // =========================================================================

    pub async fn begin_batch(&self) -> Result<AsyncBatch<'_>> {
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.execute(Operation::StartBatch { batch_id })
            .await?
            .into_done()?;
        Ok(AsyncBatch {
            client: self,
            batch_id,
            op_count: 0,
            completed: false,
        })
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        if self.shared.state.is_connected() {
            tracing::debug!("Cooperative client dropped without close");
        }
        let _ = self.shared.stop.send(true);
        self.shared.permits.close();
        if let Some(task) = self.send_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
        self.shared.correlator.fail_all(&KineticError::ConnectionClosed);
    }
}

// =============================================================================
// AsyncBatch
// =============================================================================

/// Batch handle of an [`AsyncClient`]
pub struct AsyncBatch<'a> {
    client: &'a AsyncClient,
    batch_id: u32,
    op_count: u32,
    completed: bool,
}

impl AsyncBatch<'_> {
    pub fn batch_id(&self) -> u32 {
        self.batch_id
    }

    pub fn op_count(&self) -> u32 {
        self.op_count
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub async fn put(&mut self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<()> {
        self.add(Operation::Put {
            key: key.as_ref().to_vec(),
            value: value.into(),
            options: PutOptions::default(),
        })
        .await
    }

    pub async fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.add(Operation::Delete {
            key: key.as_ref().to_vec(),
            options: DeleteOptions::default(),
        })
        .await
    }

    async fn add(&mut self, op: Operation) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        let request = op.build()?.in_batch(self.batch_id);
        self.client.enqueue(request, None).await?;
        self.op_count += 1;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        self.completed = true;
        let op = Operation::EndBatch {
            batch_id: self.batch_id,
            count: self.op_count,
        };
        self.client.execute(op).await?.into_done()
    }

    pub async fn abort(&mut self) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        self.completed = true;
        let op = Operation::AbortBatch {
            batch_id: self.batch_id,
        };
        self.client.execute(op).await?.into_done()
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn send_loop(
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut sequencer: Sequencer,
    mut queue: mpsc::Receiver<Job>,
    shared: Arc<Shared>,
) {
    while let Some(job) = queue.recv().await {
        let (mut request, completion) = match job {
            Job::Send(request, completion) => (request, completion),
            Job::Stop => break,
        };

        if let Some(err) = shared.faulted() {
            if let Some(completion) = completion {
                completion(Err(err));
            }
            continue;
        }

        let permit = if request.ack {
            match shared.permits.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    if let Some(completion) = completion {
                        completion(Err(shared.faulted().unwrap_or(KineticError::ConnectionClosed)));
                    }
                    continue;
                }
            }
        } else {
            None
        };

        let sealed = match sequencer.seal(&mut request) {
            Ok(sealed) => sealed,
            Err(err) => {
                if let Some(completion) = completion {
                    completion(Err(err));
                }
                continue;
            }
        };

        if request.ack {
            let completion = completion.unwrap_or_else(|| Box::new(|_| {}));
            let wrapped: Completion = Box::new(move |result| {
                drop(permit);
                completion(result);
            });
            if let Err(err) = shared.correlator.register(sealed.sequence, wrapped) {
                shared.fault(err);
                continue;
            }
        }

        let frame = Frame::new(sealed.envelope, request.value.clone());
        if let Err(err) = writer.send(frame).await {
            shared.fault(err);
        }

        // Let the receive task run between sends
        tokio::task::yield_now().await;
    }

    queue.close();
    while let Ok(job) = queue.try_recv() {
        if let Job::Send(_, Some(completion)) = job {
            completion(Err(KineticError::ConnectionClosed));
        }
    }
    tracing::debug!("Send task stopped");
}

async fn recv_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    auth: Authenticator,
    mut stopped: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        let next = tokio::select! {
            _ = stopped.changed() => break,
            next = next_frame(&mut reader, &shared) => next,
        };

        let result = match next {
            Some(Ok(frame)) => open_frame(&auth, &frame.envelope, frame.value)
                .and_then(|reply| shared.correlator.dispatch(reply)),
            Some(Err(err)) => Err(err),
            None => Err(KineticError::ServerDisconnected(
                "Connection closed by peer".to_string(),
            )),
        };

        if let Err(err) = result {
            match shared.state.get() {
                ConnectionState::Connected => shared.fault(err),
                _ => shared.correlator.fail_all(&KineticError::ConnectionClosed),
            }
            break;
        }
    }

    tracing::debug!("Receive task stopped");
}

/// Next frame, honouring the socket timeout only while responses are owed
async fn next_frame(
    reader: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    shared: &Shared,
) -> Option<Result<Frame>> {
    let timeout = match shared.socket_timeout {
        Some(timeout) => timeout,
        None => return reader.next().await,
    };
    loop {
        match tokio::time::timeout(timeout, reader.next()).await {
            Ok(next) => return next,
            Err(_) if shared.correlator.is_idle() => continue,
            Err(_) => {
                return Some(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for a response",
                )
                .into()))
            }
        }
    }
}
