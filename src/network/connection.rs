//! Device Connection
//!
//! Owns the socket to one device: connect and handshake, sequence stamping,
//! signing, and frame I/O.
//!
//! A [`Connection`] is used whole by the synchronous strategy. The pipelined
//! strategies split it into a [`FrameWriter`] (the single writer path that
//! assigns sequences) and a [`FrameReader`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{ClientConfig, TransferMode};
use crate::error::{KineticError, Result};
use crate::operations::Request;
use crate::protocol::{
    read_envelope, read_frame, read_frame_header, read_full, write_frame, write_frame_head,
    AuthType, Authenticator, Envelope, Reply,
};

use super::handshake::{self, Handshake};
use super::tls::{self, TlsStream};
use super::transfer::{copy_exact, DeferredValue, ValueGate};

// =============================================================================
// Stream
// =============================================================================

/// Plain or TLS socket
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    /// The underlying TCP socket
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => &tls.sock,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

// =============================================================================
// Sequencer
// =============================================================================

/// Stamps and signs outgoing commands
///
/// Sequences start at 0 for every connection and only ever increase; a
/// number is consumed even when signing or writing then fails.
#[derive(Debug)]
pub struct Sequencer {
    auth: Authenticator,
    connection_id: i64,
    cluster_version: Arc<AtomicI64>,
    next_sequence: u64,
}

/// A stamped, signed request ready for the wire
#[derive(Debug)]
pub struct Sealed {
    pub sequence: u64,
    pub envelope: Vec<u8>,
}

impl Sequencer {
    pub fn new(auth: Authenticator, connection_id: i64, cluster_version: i64) -> Self {
        Self {
            auth,
            connection_id,
            cluster_version: Arc::new(AtomicI64::new(cluster_version)),
            next_sequence: 0,
        }
    }

    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    pub fn cluster_version(&self) -> i64 {
        self.cluster_version.load(Ordering::Acquire)
    }

    /// Shared handle, updated when the device's cluster version changes
    pub fn cluster_version_handle(&self) -> Arc<AtomicI64> {
        self.cluster_version.clone()
    }

    /// Sequence the next request will get
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn seal(&mut self, request: &mut Request) -> Result<Sealed> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let header = &mut request.command.header;
        header.sequence = sequence;
        header.connection_id = self.connection_id;
        header.cluster_version = self.cluster_version();

        let envelope = self.auth.seal(&request.command, &request.auth)?.to_bytes()?;
        tracing::trace!(
            "Sealed {:?} as sequence {}",
            request.command.message_type(),
            sequence
        );
        Ok(Sealed { sequence, envelope })
    }
}

/// Decode and verify one received frame
///
/// Solicited responses must be HMAC-signed by our identity; only unsolicited
/// status frames may arrive unsigned.
pub fn open_frame(auth: &Authenticator, envelope: &[u8], value: Option<Bytes>) -> Result<Reply> {
    let envelope = Envelope::from_bytes(envelope)?;
    let command = auth.open(&envelope)?;
    if envelope.auth_type == AuthType::UnsolicitedStatus {
        if let Some(ack) = command.header.ack_sequence {
            return Err(KineticError::Authentication(format!(
                "unsigned response to sequence {}",
                ack
            )));
        }
    }
    Ok(Reply { command, value })
}

// =============================================================================
// Connection
// =============================================================================

/// An established, handshaken device connection
pub struct Connection {
    stream: Stream,
    sequencer: Sequencer,
    auth: Authenticator,
    handshake: Handshake,
    peer_addr: SocketAddr,
    gate: Arc<ValueGate>,
    chunk_size: usize,
    transfer: TransferMode,
    socket_timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("tls", &self.stream.is_tls())
            .field("connection_id", &self.sequencer.connection_id())
            .field("cluster_version", &self.sequencer.cluster_version())
            .finish()
    }
}

impl Connection {
    /// Open a socket, upgrade to TLS if configured, and run the handshake
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let tcp = open_socket(config)?;
        let peer_addr = tcp.peer_addr()?;
        tcp.set_read_timeout(config.socket_timeout)?;
        tcp.set_write_timeout(config.socket_timeout)?;

        let mut stream = match &config.tls {
            Some(options) => Stream::Tls(Box::new(tls::upgrade(tcp, options, &config.hostname)?)),
            None => Stream::Plain(tcp),
        };

        let auth = Authenticator::new(config.identity, config.secret.clone());
        let secure = stream.is_tls();
        let handshake = handshake::perform(&mut stream, &auth, config.cluster_version, secure)?;

        // Disable Nagle's algorithm for low latency
        stream.tcp().set_nodelay(true)?;

        tracing::debug!(
            "Connected to {} (connection id {}, cluster version {})",
            peer_addr,
            handshake.connection_id,
            handshake.cluster_version
        );

        Ok(Self {
            sequencer: Sequencer::new(
                auth.clone(),
                handshake.connection_id,
                handshake.cluster_version,
            ),
            stream,
            auth,
            handshake,
            peer_addr,
            gate: ValueGate::new(),
            chunk_size: config.chunk_size,
            transfer: config.value_transfer,
            socket_timeout: config.socket_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn seal(&mut self, request: &mut Request) -> Result<Sealed> {
        self.sequencer.seal(request)
    }

    /// Write a sealed request and its value
    pub fn write(&mut self, sealed: &Sealed, value: Option<&[u8]>) -> Result<()> {
        write_frame(&mut self.stream, &sealed.envelope, value, self.chunk_size)
    }

    /// Write a sealed request whose `len`-byte value comes from `file`
    pub fn write_from_file(&mut self, sealed: &Sealed, file: &mut File, len: usize) -> Result<()> {
        write_frame_head(&mut self.stream, &sealed.envelope, len)?;

        #[cfg(target_os = "linux")]
        {
            if self.transfer == TransferMode::Splice {
                if let Stream::Plain(tcp) = &self.stream {
                    use std::os::unix::io::AsRawFd;
                    super::transfer::splice::splice_exact(
                        file.as_raw_fd(),
                        tcp.as_raw_fd(),
                        len,
                        self.chunk_size,
                    )?;
                    return Ok(());
                }
            }
        }

        copy_exact(file, &mut self.stream, len, self.chunk_size)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read and verify the next frame
    ///
    /// Blocks while a deferred value from the previous frame is unconsumed.
    pub fn recv(&mut self) -> Result<Reply> {
        self.gate.wait(self.socket_timeout)?;
        let frame = read_frame(&mut self.stream)?;
        open_frame(&self.auth, &frame.envelope, frame.value)
    }

    /// Read the next frame, leaving its value on the socket
    pub fn recv_deferred(&mut self) -> Result<(Reply, Option<DeferredValue>)> {
        self.gate.wait(self.socket_timeout)?;
        let header = read_frame_header(&mut self.stream)?;
        let envelope = read_envelope(&mut self.stream, &header)?;
        let reply = open_frame(&self.auth, &envelope, None)?;

        let len = header.value_len as usize;
        if len == 0 {
            return Ok((reply, None));
        }

        let value = match &mut self.stream {
            Stream::Plain(tcp) => DeferredValue::from_socket(
                tcp.try_clone()?,
                len,
                self.gate.clone(),
                self.transfer,
                self.chunk_size,
            ),
            Stream::Tls(tls) => {
                let mut buf = vec![0u8; len];
                read_full(tls.as_mut(), &mut buf)?;
                DeferredValue::buffered(Bytes::from(buf), self.chunk_size)
            }
        };
        Ok((reply, Some(value)))
    }

    /// Shut the socket down in both directions
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.tcp().shutdown(Shutdown::Both) {
            tracing::debug!("Socket shutdown for {}: {}", self.peer_addr, e);
        }
    }

    /// Split into independent writer and reader halves
    ///
    /// Only plain TCP connections can be split.
    pub fn into_split(self) -> Result<(FrameWriter, FrameReader)> {
        let tcp = match self.stream {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(_) => {
                return Err(KineticError::Config(
                    "TLS connections cannot be split, use the synchronous strategy".to_string(),
                ))
            }
        };
        let read_stream = tcp.try_clone()?;

        let writer = FrameWriter {
            stream: BufWriter::new(tcp),
            sequencer: self.sequencer,
            chunk_size: self.chunk_size,
        };
        let reader = FrameReader {
            stream: BufReader::new(read_stream),
            auth: self.auth,
        };
        Ok((writer, reader))
    }

    /// Hand the plain socket over to another I/O layer
    pub fn into_parts(self) -> Result<(TcpStream, Sequencer, Authenticator)> {
        match self.stream {
            Stream::Plain(tcp) => Ok((tcp, self.sequencer, self.auth)),
            Stream::Tls(_) => Err(KineticError::Config(
                "TLS connections are only supported by the synchronous strategy".to_string(),
            )),
        }
    }
}

fn open_socket(config: &ClientConfig) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = config.address().to_socket_addrs()?.collect();
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => KineticError::InvalidArgument(format!(
            "{} did not resolve to any address",
            config.address()
        )),
    })
}

// =============================================================================
// Split halves
// =============================================================================

/// Writing half: assigns sequences and writes frames
pub struct FrameWriter {
    stream: BufWriter<TcpStream>,
    sequencer: Sequencer,
    chunk_size: usize,
}

impl FrameWriter {
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn seal(&mut self, request: &mut Request) -> Result<Sealed> {
        self.sequencer.seal(request)
    }

    pub fn write(&mut self, sealed: &Sealed, value: Option<&[u8]>) -> Result<()> {
        write_frame(&mut self.stream, &sealed.envelope, value, self.chunk_size)
    }

    pub fn shutdown(&self) {
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
    }

    pub fn try_clone_socket(&self) -> Result<TcpStream> {
        Ok(self.stream.get_ref().try_clone()?)
    }
}

/// Reading half: reads and verifies frames
pub struct FrameReader {
    stream: BufReader<TcpStream>,
    auth: Authenticator,
}

impl FrameReader {
    pub fn recv(&mut self) -> Result<Reply> {
        let frame = read_frame(&mut self.stream)?;
        open_frame(&self.auth, &frame.envelope, frame.value)
    }
}
