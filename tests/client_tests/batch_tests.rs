//! Batch Tests
//!
//! Atomic groups of puts and deletes.

use kinetic::operations::PutOptions;
use kinetic::protocol::MessageType;
use kinetic::{BlockingClient, KineticError, StatusCode, ThreadedClient};

use crate::common::Simulator;

#[test]
fn test_commit_applies_everything() {
    let sim = Simulator::start();
    sim.insert(b"old", b"gone soon");
    let client = BlockingClient::connect(sim.config()).unwrap();

    let mut batch = client.begin_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.put("b", "2").unwrap();
    batch.delete("old").unwrap();
    assert_eq!(batch.op_count(), 3);
    assert!(sim.value(b"a").is_none());

    batch.commit().unwrap();
    assert!(batch.is_completed());
    assert_eq!(sim.value(b"a"), Some(b"1".to_vec()));
    assert_eq!(sim.value(b"b"), Some(b"2".to_vec()));
    assert!(sim.value(b"old").is_none());
}

#[test]
fn test_members_carry_the_batch_id() {
    let sim = Simulator::start();
    let client = BlockingClient::connect(sim.config()).unwrap();

    let mut batch = client.begin_batch().unwrap();
    let id = batch.batch_id();
    batch.put("a", "1").unwrap();
    batch.commit().unwrap();

    let received = sim.received();
    let types: Vec<MessageType> = received.iter().map(|r| r.message_type).collect();
    assert_eq!(
        types,
        vec![MessageType::StartBatch, MessageType::Put, MessageType::EndBatch]
    );
    assert!(received.iter().all(|r| r.batch_id == Some(id)));
}

#[test]
fn test_batch_ids_are_distinct() {
    let sim = Simulator::start();
    let client = BlockingClient::connect(sim.config()).unwrap();

    let mut first = client.begin_batch().unwrap();
    let mut second = client.begin_batch().unwrap();
    assert_ne!(first.batch_id(), second.batch_id());

    first.abort().unwrap();
    second.abort().unwrap();
}

#[test]
fn test_abort_discards_everything() {
    let sim = Simulator::start();
    let client = BlockingClient::connect(sim.config()).unwrap();

    let mut batch = client.begin_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.put("b", "2").unwrap();
    batch.abort().unwrap();

    assert_eq!(sim.len(), 0);
    client.noop().unwrap();
}

#[test]
fn test_completed_batch_refuses_more_work() {
    let sim = Simulator::start();
    let client = BlockingClient::connect(sim.config()).unwrap();

    let mut batch = client.begin_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.commit().unwrap();
    let sent = sim.received().len();

    assert!(matches!(batch.put("b", "2"), Err(KineticError::BatchCompleted)));
    assert!(matches!(batch.commit(), Err(KineticError::BatchCompleted)));
    assert!(matches!(batch.abort(), Err(KineticError::BatchCompleted)));
    assert_eq!(sim.received().len(), sent);
}

#[test]
fn test_failed_member_aborts_the_batch() {
    let sim = Simulator::start();
    let client = BlockingClient::connect(sim.config()).unwrap();
    client
        .put_with("x", "original", PutOptions::new().new_version(b"v1".to_vec()))
        .unwrap();

    let mut batch = client.begin_batch().unwrap();
    let id = batch.batch_id();
    batch.put("fresh", "1").unwrap();
    batch
        .put_with("x", "stale", PutOptions::new().version(b"wrong".to_vec()))
        .unwrap();
    let err = batch.commit().unwrap_err();

    let failing = sim
        .received()
        .iter()
        .filter(|r| r.batch_id == Some(id) && r.message_type == MessageType::Put)
        .nth(1)
        .map(|r| r.sequence);
    match &err {
        KineticError::BatchAborted {
            failed_operation, ..
        } => assert_eq!(*failed_operation, failing),
        other => panic!("expected batch abort, got {:?}", other),
    }
    assert_eq!(err.status_code(), Some(StatusCode::InvalidBatch));

    assert!(sim.value(b"fresh").is_none());
    assert_eq!(sim.value(b"x"), Some(b"original".to_vec()));
    assert!(client.is_connected());
}

#[test]
fn test_threaded_batch() {
    let sim = Simulator::start();
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let mut batch = client.begin_batch().unwrap();
    for i in 0..5 {
        batch.put(format!("k{}", i), "v").unwrap();
    }
    batch.commit().unwrap();
    assert_eq!(sim.len(), 5);
}
