//! Wire codec
//!
//! Encoding and decoding functions for the frame layer.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────┬────────────────┬────────────────┬──────────────┬─────────────┐
//! │ 'F' (1)  │ EnvelopeLen(4) │  ValueLen (4)  │   Envelope   │    Value    │
//! └──────────┴────────────────┴────────────────┴──────────────┴─────────────┘
//! ```
//!
//! Both lengths are big-endian. `ValueLen` is 0 when no value is attached.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{KineticError, Result};

/// Magic byte opening every frame ('F')
pub const MAGIC: u8 = 0x46;

/// Header size: magic (1) + envelope length (4) + value length (4)
pub const HEADER_SIZE: usize = 9;

/// Largest envelope accepted from the wire (4 MB)
pub const MAX_ENVELOPE_SIZE: u32 = 4 * 1024 * 1024;

/// Largest attached value accepted from the wire (64 MB)
pub const MAX_FRAME_VALUE_SIZE: u32 = 64 * 1024 * 1024;

// =============================================================================
// Frame Header
// =============================================================================

/// Decoded 9-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub envelope_len: u32,
    pub value_len: u32,
}

impl FrameHeader {
    pub fn new(envelope_len: usize, value_len: usize) -> Result<Self> {
        if envelope_len > MAX_ENVELOPE_SIZE as usize {
            return Err(KineticError::Frame(format!(
                "Envelope too large: {} bytes (max {})",
                envelope_len, MAX_ENVELOPE_SIZE
            )));
        }
        if value_len > MAX_FRAME_VALUE_SIZE as usize {
            return Err(KineticError::Frame(format!(
                "Value too large: {} bytes (max {})",
                value_len, MAX_FRAME_VALUE_SIZE
            )));
        }
        Ok(Self {
            envelope_len: envelope_len as u32,
            value_len: value_len as u32,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = MAGIC;
        header[1..5].copy_from_slice(&self.envelope_len.to_be_bytes());
        header[5..9].copy_from_slice(&self.value_len.to_be_bytes());
        header
    }

    /// Decode a header, checking the magic byte first
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[0] != MAGIC {
            tracing::warn!("Invalid magic value in frame header: {:02x?}", bytes);
            return Err(KineticError::InvalidMagic(bytes[0]));
        }
        let envelope_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let value_len = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Self::new(envelope_len as usize, value_len as usize)
    }

    /// Total frame length including the header
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.envelope_len as usize + self.value_len as usize
    }
}

/// A complete frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Serialized envelope
    pub envelope: Bytes,

    /// Attached value, if any
    pub value: Option<Bytes>,
}

impl Frame {
    pub fn new(envelope: impl Into<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            envelope: envelope.into(),
            value: value.filter(|v| !v.is_empty()),
        }
    }

    pub fn header(&self) -> Result<FrameHeader> {
        FrameHeader::new(
            self.envelope.len(),
            self.value.as_ref().map(|v| v.len()).unwrap_or(0),
        )
    }
}

/// Encode a frame to bytes
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let header = frame.header()?;
    let mut message = Vec::with_capacity(header.frame_len());
    message.extend_from_slice(&header.encode());
    message.extend_from_slice(&frame.envelope);
    if let Some(value) = &frame.value {
        message.extend_from_slice(value);
    }
    Ok(message)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Fill `buf` completely, looping over partial reads.
///
/// A zero-byte read means the peer went away and maps to
/// `ServerDisconnected`.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(KineticError::ServerDisconnected(
                    "Connection closed by peer".to_string(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read and validate a frame header
pub fn read_frame_header<R: Read + ?Sized>(reader: &mut R) -> Result<FrameHeader> {
    let mut header = [0u8; HEADER_SIZE];
    read_full(reader, &mut header)?;
    FrameHeader::decode(&header)
}

/// Read the envelope bytes that follow a header
pub fn read_envelope<R: Read + ?Sized>(reader: &mut R, header: &FrameHeader) -> Result<Bytes> {
    let mut envelope = vec![0u8; header.envelope_len as usize];
    read_full(reader, &mut envelope)?;
    Ok(Bytes::from(envelope))
}

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame> {
    let header = read_frame_header(reader)?;
    let envelope = read_envelope(reader, &header)?;

    let value = if header.value_len > 0 {
        let mut value = vec![0u8; header.value_len as usize];
        read_full(reader, &mut value)?;
        Some(Bytes::from(value))
    } else {
        None
    };

    Ok(Frame { envelope, value })
}

/// Write a frame header and envelope, leaving the value to the caller
pub fn write_frame_head<W: Write + ?Sized>(
    writer: &mut W,
    envelope: &[u8],
    value_len: usize,
) -> Result<()> {
    let header = FrameHeader::new(envelope.len(), value_len)?;
    writer.write_all(&header.encode())?;
    writer.write_all(envelope)?;
    Ok(())
}

/// Write a frame to a stream, sending the value in `chunk_size` pieces
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    envelope: &[u8],
    value: Option<&[u8]>,
    chunk_size: usize,
) -> Result<()> {
    let value = value.unwrap_or(&[]);
    write_frame_head(writer, envelope, value.len())?;
    for chunk in value.chunks(chunk_size.max(1)) {
        writer.write_all(chunk)?;
    }
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Async codec
// =============================================================================

/// Frame codec for `tokio_util` framed transports
#[derive(Debug, Default)]
pub struct FrameCodec {
    header: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = KineticError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let header = match self.header {
            Some(header) => header,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; HEADER_SIZE];
                raw.copy_from_slice(&src[..HEADER_SIZE]);
                let header = FrameHeader::decode(&raw)?;
                src.advance(HEADER_SIZE);
                self.header = Some(header);
                header
            }
        };

        let body_len = header.envelope_len as usize + header.value_len as usize;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.header = None;
        let envelope = src.split_to(header.envelope_len as usize).freeze();
        let value = if header.value_len > 0 {
            Some(src.split_to(header.value_len as usize).freeze())
        } else {
            None
        };
        Ok(Some(Frame { envelope, value }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.header.is_none() => Ok(None),
            None => Err(KineticError::ServerDisconnected(
                "Connection closed by peer mid-frame".to_string(),
            )),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = KineticError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let header = frame.header()?;
        dst.reserve(header.frame_len());
        dst.put_slice(&header.encode());
        dst.put_slice(&frame.envelope);
        if let Some(value) = &frame.value {
            dst.put_slice(value);
        }
        Ok(())
    }
}
