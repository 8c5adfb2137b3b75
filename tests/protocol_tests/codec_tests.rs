//! Codec Tests
//!
//! Tests for the 9-byte frame header and frame reading/writing.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use kinetic::protocol::{
    encode_frame, read_frame, write_frame, Frame, FrameCodec, FrameHeader, HEADER_SIZE, MAGIC,
    MAX_ENVELOPE_SIZE, MAX_FRAME_VALUE_SIZE,
};
use kinetic::KineticError;
use tokio_util::codec::{Decoder, Encoder};

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout_is_big_endian() {
    let header = FrameHeader::new(0x0102, 0x030405).unwrap();
    let bytes = header.encode();

    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(bytes[0], b'F');
    assert_eq!(&bytes[1..5], &[0x00, 0x00, 0x01, 0x02]);
    assert_eq!(&bytes[5..9], &[0x00, 0x03, 0x04, 0x05]);
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut bytes = FrameHeader::new(4, 0).unwrap().encode();
    bytes[0] = b'G';

    match FrameHeader::decode(&bytes) {
        Err(KineticError::InvalidMagic(b)) => assert_eq!(b, b'G'),
        other => panic!("Expected InvalidMagic, got {:?}", other),
    }
}

#[test]
fn test_oversized_lengths_are_rejected() {
    assert!(matches!(
        FrameHeader::new(MAX_ENVELOPE_SIZE as usize + 1, 0),
        Err(KineticError::Frame(_))
    ));
    assert!(matches!(
        FrameHeader::new(16, MAX_FRAME_VALUE_SIZE as usize + 1),
        Err(KineticError::Frame(_))
    ));
}

#[test]
fn test_oversized_length_on_the_wire_is_rejected() {
    let mut bytes = vec![MAGIC];
    bytes.extend_from_slice(&(MAX_ENVELOPE_SIZE + 1).to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());

    let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, KineticError::Frame(_)));
    assert!(err.is_fatal());
}

// =============================================================================
// Frame Tests
// =============================================================================

#[test]
fn test_frame_with_value() {
    let frame = Frame::new(b"envelope".to_vec(), Some(Bytes::from_static(b"value")));
    let encoded = encode_frame(&frame).unwrap();

    assert_eq!(encoded.len(), HEADER_SIZE + 8 + 5);
    assert_eq!(read_frame(&mut Cursor::new(encoded)).unwrap(), frame);
}

#[test]
fn test_empty_value_is_no_value() {
    let frame = Frame::new(b"envelope".to_vec(), Some(Bytes::new()));
    assert_eq!(frame.value, None);

    let encoded = encode_frame(&frame).unwrap();
    assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
}

#[test]
fn test_write_frame_matches_encode_frame() {
    let value = vec![7u8; 10_000];
    let mut written = Vec::new();
    write_frame(&mut written, b"env", Some(&value), 1024).unwrap();

    let frame = Frame::new(b"env".to_vec(), Some(Bytes::from(value)));
    assert_eq!(written, encode_frame(&frame).unwrap());
}

#[test]
fn test_truncated_frame_is_a_disconnect() {
    let frame = Frame::new(b"envelope".to_vec(), Some(Bytes::from_static(b"value")));
    let mut encoded = encode_frame(&frame).unwrap();
    encoded.truncate(encoded.len() - 2);

    assert!(matches!(
        read_frame(&mut Cursor::new(encoded)),
        Err(KineticError::ServerDisconnected(_))
    ));
}

#[test]
fn test_back_to_back_frames() {
    let first = Frame::new(b"one".to_vec(), None);
    let second = Frame::new(b"two".to_vec(), Some(Bytes::from_static(b"2")));
    let mut stream = encode_frame(&first).unwrap();
    stream.extend(encode_frame(&second).unwrap());

    let mut cursor = Cursor::new(stream);
    assert_eq!(read_frame(&mut cursor).unwrap(), first);
    assert_eq!(read_frame(&mut cursor).unwrap(), second);
}

// =============================================================================
// Async Codec Tests
// =============================================================================

#[test]
fn test_codec_waits_for_a_whole_frame() {
    let frame = Frame::new(b"envelope".to_vec(), Some(Bytes::from_static(b"value")));
    let encoded = encode_frame(&frame).unwrap();
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    buf.extend_from_slice(&encoded[..4]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&encoded[4..12]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&encoded[12..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
    assert!(buf.is_empty());
}

#[test]
fn test_codec_encode_matches_blocking_encoder() {
    let frame = Frame::new(b"envelope".to_vec(), Some(Bytes::from_static(b"value")));
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    codec.encode(frame.clone(), &mut buf).unwrap();
    assert_eq!(buf.to_vec(), encode_frame(&frame).unwrap());
}

#[test]
fn test_codec_eof_mid_frame_is_a_disconnect() {
    let frame = Frame::new(b"envelope".to_vec(), None);
    let encoded = encode_frame(&frame).unwrap();
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);

    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(KineticError::ServerDisconnected(_))
    ));
}
