//! Value transfer
//!
//! Moves value bytes between the socket and files without holding whole
//! values in memory.
//!
//! ## Deferred reads
//! ```text
//!   recv_deferred ──► header + envelope read ──► gate: Pending
//!                                                   │
//!   DeferredValue ── copy_to / splice_to / drop ────┘──► gate: Idle
//!                                                         │
//!   next recv ── waits on the gate ◄──────────────────────┘
//! ```
//!
//! The socket position is shared, so the next frame may not be read until
//! the pending value has been consumed. Dropping a [`DeferredValue`] drains
//! whatever is left.
//!
//! ## Splice
//! On Linux, [`TransferMode::Splice`] moves bytes with splice(2) through an
//! intermediate pipe, so they never enter user space. Other platforms and
//! TLS connections copy through a `chunk_size` buffer.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::config::TransferMode;
use crate::error::{KineticError, Result};

// =============================================================================
// Gate
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Pending,
    /// A value was abandoned half-read; the stream position is lost
    Broken,
}

/// Orders frame reads behind an unconsumed deferred value
#[derive(Debug)]
pub struct ValueGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ValueGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState::Idle),
            cond: Condvar::new(),
        })
    }

    fn hold(&self) {
        *self.state.lock() = GateState::Pending;
    }

    fn release(&self, consumed: bool) {
        let mut state = self.state.lock();
        *state = if consumed {
            GateState::Idle
        } else {
            GateState::Broken
        };
        self.cond.notify_all();
    }

    /// Block until no deferred value is outstanding
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match *state {
                GateState::Idle => return Ok(()),
                GateState::Broken => {
                    return Err(KineticError::Frame(
                        "deferred value was not fully read".to_string(),
                    ))
                }
                GateState::Pending => match timeout {
                    Some(timeout) => {
                        if self.cond.wait_for(&mut state, timeout).timed_out()
                            && *state == GateState::Pending
                        {
                            return Err(KineticError::Frame(
                                "timed out waiting for a deferred value to be consumed"
                                    .to_string(),
                            ));
                        }
                    }
                    None => self.cond.wait(&mut state),
                },
            }
        }
    }
}

// =============================================================================
// Deferred Value
// =============================================================================

enum ValueSource {
    /// Still on the socket
    Socket(TcpStream),
    /// Already read (TLS connections)
    Buffered(Bytes),
}

/// A response value left on the wire for the caller to consume
pub struct DeferredValue {
    source: ValueSource,
    len: usize,
    remaining: usize,
    gate: Option<Arc<ValueGate>>,
    mode: TransferMode,
    chunk_size: usize,
}

impl std::fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredValue")
            .field("len", &self.len)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl DeferredValue {
    pub(crate) fn from_socket(
        stream: TcpStream,
        len: usize,
        gate: Arc<ValueGate>,
        mode: TransferMode,
        chunk_size: usize,
    ) -> Self {
        gate.hold();
        Self {
            source: ValueSource::Socket(stream),
            len,
            remaining: len,
            gate: Some(gate),
            mode,
            chunk_size: chunk_size.max(1),
        }
    }

    pub(crate) fn buffered(value: Bytes, chunk_size: usize) -> Self {
        let len = value.len();
        Self {
            source: ValueSource::Buffered(value),
            len,
            remaining: len,
            gate: None,
            mode: TransferMode::Buffered,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the value into `writer`
    pub fn copy_to<W: Write + ?Sized>(mut self, writer: &mut W) -> Result<u64> {
        let result = self.copy_remaining(writer);
        self.finish(result.is_ok());
        result
    }

    /// Write the value into `file`, splicing when configured
    pub fn splice_to(mut self, file: &mut File) -> Result<u64> {
        #[cfg(target_os = "linux")]
        {
            if self.mode == TransferMode::Splice {
                if let ValueSource::Socket(stream) = &self.source {
                    use std::os::unix::io::AsRawFd;
                    let result =
                        splice::splice_exact(stream.as_raw_fd(), file.as_raw_fd(), self.remaining, self.chunk_size)
                            .map_err(KineticError::from);
                    if result.is_ok() {
                        self.remaining = 0;
                    }
                    self.finish(result.is_ok());
                    return result;
                }
            }
        }
        self.copy_to(file)
    }

    /// Read the whole value into memory
    pub fn into_bytes(mut self) -> Result<Bytes> {
        if let ValueSource::Buffered(value) = &self.source {
            let value = value.clone();
            self.remaining = 0;
            self.finish(true);
            return Ok(value);
        }
        let mut buf = Vec::with_capacity(self.remaining);
        self.copy_to(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Skip the value
    pub fn discard(self) -> Result<()> {
        self.copy_to(&mut std::io::sink()).map(|_| ())
    }

    fn copy_remaining<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let mut total = 0u64;
        match &mut self.source {
            ValueSource::Buffered(value) => {
                let start = self.len - self.remaining;
                for chunk in value[start..].chunks(self.chunk_size) {
                    writer.write_all(chunk)?;
                    self.remaining -= chunk.len();
                    total += chunk.len() as u64;
                }
            }
            ValueSource::Socket(stream) => {
                let mut buf = vec![0u8; self.chunk_size.min(self.remaining.max(1))];
                while self.remaining > 0 {
                    let want = buf.len().min(self.remaining);
                    let n = match stream.read(&mut buf[..want]) {
                        Ok(0) => {
                            return Err(KineticError::ServerDisconnected(
                                "Connection closed while reading value".to_string(),
                            ))
                        }
                        Ok(n) => n,
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    writer.write_all(&buf[..n])?;
                    self.remaining -= n;
                    total += n as u64;
                }
            }
        }
        writer.flush()?;
        Ok(total)
    }

    fn finish(&mut self, consumed: bool) {
        if let Some(gate) = self.gate.take() {
            gate.release(consumed && self.remaining == 0);
        }
    }
}

impl Drop for DeferredValue {
    fn drop(&mut self) {
        if self.gate.is_some() {
            let drained = self.remaining == 0 || self.copy_remaining(&mut std::io::sink()).is_ok();
            if !drained {
                tracing::warn!("Failed to drain deferred value, stream position lost");
            }
            self.finish(drained);
        }
    }
}

// =============================================================================
// Copy helpers
// =============================================================================

/// Copy exactly `len` bytes from `reader` to `writer`, `chunk_size` at a time
pub fn copy_exact<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    len: usize,
    chunk_size: usize,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1).min(len.max(1))];
    let mut remaining = len;
    while remaining > 0 {
        let want = buf.len().min(remaining);
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(KineticError::InvalidArgument(format!(
                    "source ended {} bytes early",
                    remaining
                )))
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        remaining -= n;
    }
    Ok(len as u64)
}

#[cfg(target_os = "linux")]
pub(crate) mod splice {
    use std::io;
    use std::os::unix::io::RawFd;
    use std::ptr;

    /// Anonymous pipe used as the splice intermediary
    struct Pipe {
        read: RawFd,
        write: RawFd,
    }

    impl Pipe {
        fn new() -> io::Result<Self> {
            let mut fds = [0 as libc::c_int; 2];
            // SAFETY: fds points to two writable c_ints.
            if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                read: fds[0],
                write: fds[1],
            })
        }
    }

    impl Drop for Pipe {
        fn drop(&mut self) {
            // SAFETY: both descriptors were opened by pipe2 and are owned here.
            unsafe {
                libc::close(self.read);
                libc::close(self.write);
            }
        }
    }

    fn splice_once(from: RawFd, to: RawFd, len: usize) -> io::Result<usize> {
        loop {
            // SAFETY: null offsets use and advance the descriptors' own positions.
            let n = unsafe {
                libc::splice(
                    from,
                    ptr::null_mut(),
                    to,
                    ptr::null_mut(),
                    len,
                    libc::SPLICE_F_MOVE | libc::SPLICE_F_MORE,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Move exactly `len` bytes from `from` to `to` through a pipe
    pub fn splice_exact(from: RawFd, to: RawFd, len: usize, chunk_size: usize) -> io::Result<u64> {
        let pipe = Pipe::new()?;
        let mut remaining = len;
        while remaining > 0 {
            let moved = splice_once(from, pipe.write, remaining.min(chunk_size.max(1)))?;
            if moved == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source ended during splice",
                ));
            }
            let mut in_pipe = moved;
            while in_pipe > 0 {
                let n = splice_once(pipe.read, to, in_pipe)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "destination closed during splice",
                    ));
                }
                in_pipe -= n;
            }
            remaining -= moved;
        }
        Ok(len as u64)
    }
}
