//! Threaded strategy
//!
//! Preemptive pipelining over two OS threads.
//!
//! ```text
//!   callers ──► bounded job queue ──► writer thread ──► socket
//!                                        │  (seal, register, write)
//!                                        ▼
//!                                  pending table ◄── reader thread ◄── socket
//!                                                    (verify, dispatch)
//! ```
//!
//! The writer is the only thread that assigns sequences, so requests hit
//! the wire in submission order. It stops taking new requests while
//! `max_outstanding` responses are owed.
//!
//! Completions run on the reader thread (or on the writer, for requests that
//! never went out). They may submit more work, but a blocking wait there
//! fails with [`KineticError::BlockingInCompletion`] instead of wedging the
//! connection.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::ClientConfig;
use crate::error::{KineticError, Result};
use crate::network::{
    Completion, Connection, ConnectionState, Correlator, FrameReader, FrameWriter, Hooks,
    StateCell,
};
use crate::operations::Request;

use super::strategy::Strategy;

thread_local! {
    static IO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a writer or reader of some threaded
/// connection
pub(crate) fn on_io_thread() -> bool {
    IO_THREAD.with(Cell::get)
}

fn mark_io_thread() {
    IO_THREAD.with(|flag| flag.set(true));
}

enum Job {
    Send(Request, Option<Completion>),
    Stop,
}

// =============================================================================
// Inflight ceiling
// =============================================================================

/// Counting gate over unacknowledged requests
#[derive(Debug)]
pub(crate) struct InflightGate {
    count: Mutex<usize>,
    cond: Condvar,
    limit: usize,
}

impl InflightGate {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
            limit: limit.max(1),
        }
    }

    /// Wait for a slot. Gives up once the connection has faulted.
    fn acquire(&self, state: &StateCell) -> Result<()> {
        let mut count = self.count.lock();
        while *count >= self.limit {
            if let Some(err) = state.fault_error() {
                return Err(KineticError::ConnectionFaulted(Box::new(err)));
            }
            self.cond.wait(&mut count);
        }
        *count += 1;
        Ok(())
    }

    fn release(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        self.cond.notify_one();
    }

    /// Wake a writer waiting for a slot so it sees the fault
    fn interrupt(&self) {
        let _count = self.count.lock();
        self.cond.notify_all();
    }

    pub(crate) fn in_flight(&self) -> usize {
        *self.count.lock()
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct Shared {
    correlator: Correlator,
    state: StateCell,
    inflight: InflightGate,
    socket_timeout: Option<Duration>,
}

impl Shared {
    fn fault(&self, writer_socket: Option<&std::net::TcpStream>, err: KineticError) {
        self.state.fault(err.clone());
        self.inflight.interrupt();
        self.correlator.fail_all(&err);
        if let Some(socket) = writer_socket {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Writer thread + reader thread strategy
pub struct Threaded {
    jobs: Sender<Job>,
    shared: Arc<Shared>,
    socket: std::net::TcpStream,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connection_id: i64,
    cluster_version: Arc<AtomicI64>,
}

impl Strategy for Threaded {
    fn connect(config: &ClientConfig, hooks: Hooks) -> Result<Self> {
        if config.tls.is_some() {
            return Err(KineticError::Config(
                "TLS is only supported by the synchronous strategy".to_string(),
            ));
        }

        let connection = Connection::connect(config)?;
        let connection_id = connection.sequencer().connection_id();
        let cluster_version = connection.sequencer().cluster_version_handle();
        let peer = connection.peer_addr();
        let (frame_writer, frame_reader) = connection.into_split()?;
        let socket = frame_writer.try_clone_socket()?;

        let shared = Arc::new(Shared {
            correlator: Correlator::new(hooks),
            state: StateCell::new(),
            inflight: InflightGate::new(config.max_outstanding),
            socket_timeout: config.socket_timeout,
        });
        shared.state.set_connected()?;

        let (jobs, queue) = channel::bounded(config.queue_capacity);

        let writer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("kinetic-writer-{}", peer))
                .spawn(move || write_loop(frame_writer, queue, shared))?
        };
        let reader = {
            let shared = shared.clone();
            let socket = socket.try_clone()?;
            thread::Builder::new()
                .name(format!("kinetic-reader-{}", peer))
                .spawn(move || read_loop(frame_reader, socket, shared))?
        };

        Ok(Self {
            jobs,
            shared,
            socket,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            connection_id,
            cluster_version,
        })
    }

    fn submit(&self, request: Request, completion: Option<Completion>) -> Result<()> {
        self.shared.state.check_ready()?;
        self.jobs
            .send(Job::Send(request, completion))
            .map_err(|_| KineticError::ConnectionClosed)
    }

    fn close(&self, drain: bool) -> Result<()> {
        let previous = self.shared.state.begin_close();
        if matches!(previous, ConnectionState::Disconnected) {
            return Ok(());
        }

        // Everything queued before the stop marker still goes out
        let _ = self.jobs.send(Job::Stop);
        if on_io_thread() {
            // Called from a completion; the loops stop on their own
            let _ = self.socket.shutdown(std::net::Shutdown::Both);
            return Ok(());
        }
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }

        if drain && !self.shared.correlator.wait_idle(self.shared.socket_timeout) {
            tracing::warn!(
                "Closing with {} requests still outstanding",
                self.shared.correlator.pending_count()
            );
        }

        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }
        self.shared.correlator.fail_all(&KineticError::ConnectionClosed);
        self.shared.state.reset();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn is_tls(&self) -> bool {
        false
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

impl Threaded {
    /// Requests currently owed a response
    pub fn in_flight(&self) -> usize {
        self.shared.inflight.in_flight()
    }
}

impl Drop for Threaded {
    fn drop(&mut self) {
        let _ = self.close(false);
    }
}

// =============================================================================
// Loops
// =============================================================================

fn write_loop(mut writer: FrameWriter, queue: Receiver<Job>, shared: Arc<Shared>) {
    mark_io_thread();
    let socket = writer.try_clone_socket().ok();

    for job in queue.iter() {
        let (mut request, completion) = match job {
            Job::Send(request, completion) => (request, completion),
            Job::Stop => break,
        };

        if let Some(err) = shared.state.fault_error() {
            if let Some(completion) = completion {
                completion(Err(KineticError::ConnectionFaulted(Box::new(err))));
            }
            continue;
        }

        if request.ack {
            if let Err(err) = shared.inflight.acquire(&shared.state) {
                if let Some(completion) = completion {
                    completion(Err(err));
                }
                continue;
            }
        }

        let sealed = match writer.seal(&mut request) {
            Ok(sealed) => sealed,
            Err(err) => {
                if request.ack {
                    shared.inflight.release();
                }
                if let Some(completion) = completion {
                    completion(Err(err));
                }
                continue;
            }
        };

        if request.ack {
            let gate = shared.clone();
            let completion = completion.unwrap_or_else(|| Box::new(|_| {}));
            let wrapped: Completion = Box::new(move |result| {
                gate.inflight.release();
                completion(result);
            });
            if let Err(err) = shared.correlator.register(sealed.sequence, wrapped) {
                shared.fault(socket.as_ref(), err);
                continue;
            }
        }

        if let Err(err) = writer.write(&sealed, request.value.as_deref()) {
            shared.fault(socket.as_ref(), err);
        }
    }

    for job in queue.try_iter() {
        if let Job::Send(_, Some(completion)) = job {
            completion(Err(KineticError::ConnectionClosed));
        }
    }
    tracing::debug!("Writer stopped");
}

fn read_loop(mut reader: FrameReader, socket: std::net::TcpStream, shared: Arc<Shared>) {
    mark_io_thread();
    loop {
        match reader.recv() {
            Ok(reply) => {
                if let Err(err) = shared.correlator.dispatch(reply) {
                    shared.fault(Some(&socket), err);
                    break;
                }
            }
            Err(err) if err.is_timeout() && shared.correlator.is_idle() => {
                if !shared.state.is_connected() {
                    break;
                }
            }
            Err(err) => {
                match shared.state.get() {
                    ConnectionState::Closing => {
                        shared.correlator.fail_all(&KineticError::ConnectionClosed)
                    }
                    ConnectionState::Connected => shared.fault(Some(&socket), err),
                    _ => {}
                }
                break;
            }
        }
    }

    tracing::debug!("Reader stopped");
}
