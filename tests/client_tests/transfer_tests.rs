//! Zero-Copy Transfer Tests
//!
//! Values moving between files and the socket.

use std::io::{Read, Seek, SeekFrom, Write};

use kinetic::operations::PutOptions;
use kinetic::{BlockingClient, ClientConfig, TransferMode};

use crate::common::Simulator;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn connect(sim: &Simulator, mode: TransferMode) -> BlockingClient {
    let config = ClientConfig {
        value_transfer: mode,
        chunk_size: 4096,
        ..sim.config()
    };
    BlockingClient::connect(config).unwrap()
}

fn read_all(file: &mut std::fs::File) -> Vec<u8> {
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.read_to_end(&mut contents).unwrap();
    contents
}

fn get_to_file_roundtrip(mode: TransferMode) {
    let sim = Simulator::start();
    let value = pattern(300_000);
    sim.insert(b"big", &value);
    let client = connect(&sim, mode);

    let mut file = tempfile::tempfile().unwrap();
    let metadata = client.get_to_file("big", &mut file).unwrap();
    assert!(metadata.is_some());
    assert_eq!(read_all(&mut file), value);

    // The stream is still aligned on frame boundaries
    client.noop().unwrap();
}

#[test]
fn test_get_to_file_buffered() {
    get_to_file_roundtrip(TransferMode::Buffered);
}

#[test]
fn test_get_to_file_splice() {
    get_to_file_roundtrip(TransferMode::Splice);
}

#[test]
fn test_get_missing_to_file() {
    let sim = Simulator::start();
    let client = connect(&sim, TransferMode::Buffered);

    let mut file = tempfile::tempfile().unwrap();
    assert!(client.get_to_file("missing", &mut file).unwrap().is_none());
    assert!(read_all(&mut file).is_empty());
}

#[test]
fn test_get_to_writer() {
    let sim = Simulator::start();
    let value = pattern(50_000);
    sim.insert(b"key", &value);
    let client = connect(&sim, TransferMode::Buffered);

    let mut out = Vec::new();
    client.get_to_writer("key", &mut out).unwrap();
    assert_eq!(out, value);
}

#[test]
fn test_put_from_file() {
    let sim = Simulator::start();
    let value = pattern(200_000);
    let client = connect(&sim, TransferMode::Buffered);

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&value).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    client
        .put_from_file("from-file", &mut file, PutOptions::default())
        .unwrap();
    assert_eq!(sim.value(b"from-file"), Some(value.clone()));

    file.seek(SeekFrom::Start(1000)).unwrap();
    client
        .put_from_file("tail", &mut file, PutOptions::default())
        .unwrap();
    assert_eq!(sim.value(b"tail"), Some(value[1000..].to_vec()));
}

#[test]
fn test_file_roundtrip_through_device() {
    let sim = Simulator::start();
    let value = pattern(128 * 1024);
    let client = connect(&sim, TransferMode::Splice);

    let mut source = tempfile::tempfile().unwrap();
    source.write_all(&value).unwrap();
    source.seek(SeekFrom::Start(0)).unwrap();
    client
        .put_from_file("copy", &mut source, PutOptions::default())
        .unwrap();

    let mut dest = tempfile::tempfile().unwrap();
    client.get_to_file("copy", &mut dest).unwrap().unwrap();
    assert_eq!(read_all(&mut dest), value);
}
