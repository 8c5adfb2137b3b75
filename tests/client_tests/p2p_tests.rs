//! Peer-to-Peer Tests
//!
//! Pushes between in-process devices.

use kinetic::{BlockingClient, PushKey, StatusCode};

use crate::common::Simulator;

fn item_codes(items: &[kinetic::protocol::P2pItem]) -> Vec<Option<StatusCode>> {
    items
        .iter()
        .map(|item| item.status.as_ref().map(|s| s.code))
        .collect()
}

#[test]
fn test_push_copies_keys() {
    let source = Simulator::start();
    let target = Simulator::start();
    source.insert(b"a", b"alpha");
    source.insert(b"b", b"beta");

    let client = BlockingClient::connect(source.config()).unwrap();
    let items = client.push(["a", "b"].map(|k| k.as_bytes()), target.peer()).unwrap();

    assert_eq!(
        item_codes(&items),
        vec![Some(StatusCode::Success), Some(StatusCode::Success)]
    );
    assert_eq!(target.value(b"a"), Some(b"alpha".to_vec()));
    assert_eq!(target.value(b"b"), Some(b"beta".to_vec()));
}

#[test]
fn test_push_reports_per_key_status() {
    let source = Simulator::start();
    let target = Simulator::start();
    source.insert(b"here", b"1");

    let client = BlockingClient::connect(source.config()).unwrap();
    let items = client
        .push(["here", "missing"].map(|k| k.as_bytes()), target.peer())
        .unwrap();

    assert_eq!(
        item_codes(&items),
        vec![Some(StatusCode::Success), Some(StatusCode::NotFound)]
    );
    assert_eq!(target.len(), 1);
}

#[test]
fn test_push_under_new_key() {
    let source = Simulator::start();
    let target = Simulator::start();
    source.insert(b"a", b"alpha");

    let client = BlockingClient::connect(source.config()).unwrap();
    let key = PushKey {
        new_key: Some(b"renamed".to_vec()),
        ..PushKey::new("a")
    };
    client.push([key], target.peer()).unwrap();

    assert!(target.value(b"a").is_none());
    assert_eq!(target.value(b"renamed"), Some(b"alpha".to_vec()));
}

#[test]
fn test_piped_push_relays_through_every_peer() {
    let source = Simulator::start();
    let middle = Simulator::start();
    let last = Simulator::start();
    source.insert(b"k", b"relayed");

    let client = BlockingClient::connect(source.config()).unwrap();
    let items = client
        .piped_push([&b"k"[..]], &[middle.peer(), last.peer()])
        .unwrap();

    assert_eq!(item_codes(&items), vec![Some(StatusCode::Success)]);
    assert_eq!(middle.value(b"k"), Some(b"relayed".to_vec()));
    assert_eq!(last.value(b"k"), Some(b"relayed".to_vec()));
}

#[test]
fn test_push_keys_in_chunks() {
    let source = Simulator::start();
    let target = Simulator::start();
    let keys: Vec<Vec<u8>> = (0..5).map(|i| format!("k{}", i).into_bytes()).collect();
    for key in &keys {
        source.insert(key, b"v");
    }

    let client = BlockingClient::connect(source.config()).unwrap();
    let items = client.push_keys(keys, target.peer(), 2).unwrap();

    assert_eq!(items.len(), 5);
    assert_eq!(target.len(), 5);
    let pushes = source
        .received()
        .iter()
        .filter(|r| r.message_type == kinetic::protocol::MessageType::PeerToPeerPush)
        .count();
    assert_eq!(pushes, 3);
}

#[test]
fn test_piped_push_needs_a_peer() {
    let source = Simulator::start();
    let client = BlockingClient::connect(source.config()).unwrap();

    assert!(matches!(
        client.piped_push([&b"k"[..]], &[]),
        Err(kinetic::KineticError::InvalidArgument(_))
    ));
    assert!(source.received().is_empty());
}
