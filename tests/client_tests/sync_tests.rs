//! Synchronous Client Tests

use std::sync::Arc;

use parking_lot::Mutex;

use kinetic::network::Hooks;
use kinetic::operations::{crc32_tag, DeleteOptions, PutOptions};
use kinetic::protocol::{IntegrityAlgorithm, MessageType};
use kinetic::{BlockingClient, ConnectionState, KeyRange, KineticError, StatusCode};

use crate::common::{SimOptions, Simulator};

fn connect(sim: &Simulator) -> BlockingClient {
    BlockingClient::connect(sim.config()).unwrap()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_get_delete() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.put("key1", "value1").unwrap();
    assert_eq!(sim.value(b"key1"), Some(b"value1".to_vec()));

    let entry = client.get("key1").unwrap().unwrap();
    assert_eq!(entry.key, b"key1");
    assert_eq!(entry.value_bytes(), b"value1");

    assert!(client.delete("key1").unwrap());
    assert_eq!(sim.len(), 0);
}

#[test]
fn test_missing_key() {
    let sim = Simulator::start();
    let client = connect(&sim);

    assert!(client.get("nothing").unwrap().is_none());
    assert!(client.get_version("nothing").unwrap().is_none());
    assert!(!client.delete("nothing").unwrap());
}

#[test]
fn test_empty_value_round_trips() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.put("empty", "").unwrap();
    let entry = client.get("empty").unwrap().unwrap();
    assert_eq!(entry.value.as_deref(), Some(&b""[..]));

    client.put("next", "v").unwrap();
    let entry = client.get_previous("next").unwrap().unwrap();
    assert_eq!(entry.key, b"empty");
    assert_eq!(entry.value.as_deref(), Some(&b""[..]));

    let meta = client.get_metadata("empty").unwrap().unwrap();
    assert!(meta.value.is_none());
}

#[test]
fn test_noop_and_flush() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.noop().unwrap();
    client.flush().unwrap();

    let types: Vec<MessageType> = sim.received().iter().map(|r| r.message_type).collect();
    assert_eq!(types, vec![MessageType::Noop, MessageType::FlushAllData]);
}

#[test]
fn test_sequences_increase_on_one_connection() {
    let sim = Simulator::start();
    let client = connect(&sim);

    for i in 0..5 {
        client.put(format!("k{}", i), "v").unwrap();
    }

    let received = sim.received();
    let id = client.connection_id().unwrap();
    assert!(received.iter().all(|r| r.connection_id == id));
    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[test]
fn test_put_tags_value_with_crc32() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.put("key", "tagged").unwrap();

    let stored = sim.stored(b"key").unwrap();
    assert_eq!(stored.tag, Some(crc32_tag(b"tagged")));
    assert_eq!(stored.algorithm, Some(IntegrityAlgorithm::Crc32));

    let entry = client.get_metadata("key").unwrap().unwrap();
    assert!(entry.value.is_none());
    assert_eq!(entry.metadata.tag, Some(crc32_tag(b"tagged")));
}

// =============================================================================
// Versions
// =============================================================================

#[test]
fn test_versioned_updates() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client
        .put_with("key", "one", PutOptions::new().new_version(b"v1".to_vec()))
        .unwrap();
    assert_eq!(client.get_version("key").unwrap(), Some(b"v1".to_vec()));

    let err = client.put("key", "blind").unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::VersionMismatch));
    assert!(!err.is_fatal());

    client
        .put_with(
            "key",
            "two",
            PutOptions::new()
                .version(b"v1".to_vec())
                .new_version(b"v2".to_vec()),
        )
        .unwrap();
    let entry = client.get("key").unwrap().unwrap();
    assert_eq!(entry.value_bytes(), b"two");
    assert_eq!(entry.metadata.version, Some(b"v2".to_vec()));

    let err = client
        .delete_with("key", DeleteOptions::new().version(b"v1".to_vec()))
        .unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::VersionMismatch));

    assert!(client
        .delete_with("key", DeleteOptions::new().force(true))
        .unwrap());
    assert!(client.is_connected());
}

// =============================================================================
// Navigation and Ranges
// =============================================================================

#[test]
fn test_next_and_previous() {
    let sim = Simulator::start();
    for key in ["a", "c", "e"] {
        sim.insert(key.as_bytes(), key.as_bytes());
    }
    let client = connect(&sim);

    assert_eq!(client.get_next("c").unwrap().unwrap().key, b"e");
    assert_eq!(client.get_next("b").unwrap().unwrap().key, b"c");
    assert!(client.get_next("e").unwrap().is_none());

    assert_eq!(client.get_previous("c").unwrap().unwrap().key, b"a");
    assert!(client.get_previous("a").unwrap().is_none());
}

#[test]
fn test_key_range() {
    let sim = Simulator::start();
    for key in ["a", "b", "c", "d", "e"] {
        sim.insert(key.as_bytes(), b"v");
    }
    let client = connect(&sim);

    let keys = client.get_key_range(&KeyRange::new("b", "d"), 10).unwrap();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    let exclusive = KeyRange::new("b", "d").with_bounds(false, false);
    assert_eq!(client.get_key_range(&exclusive, 10).unwrap(), vec![b"c".to_vec()]);

    let reversed = client
        .get_key_range_with(&KeyRange::new("a", "e"), 2, true)
        .unwrap();
    assert_eq!(reversed, vec![b"e".to_vec(), b"d".to_vec()]);

    assert_eq!(client.get_keys_from("d", 10).unwrap().len(), 2);
}

#[test]
fn test_range_iteration_pages() {
    let sim = Simulator::start();
    for i in 0..7 {
        sim.insert(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes());
    }
    sim.insert(b"other", b"x");

    let config = kinetic::ClientConfig {
        range_page_size: 2,
        range_prefetch: 3,
        ..sim.config()
    };
    let client = BlockingClient::connect(config).unwrap();

    let entries: Vec<_> = client
        .get_range(KeyRange::prefix("key"))
        .collect::<kinetic::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(entries.len(), 7);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.key, format!("key{}", i).into_bytes());
        assert_eq!(entry.value_bytes(), format!("value{}", i).as_bytes());
    }

    let listings = sim
        .received()
        .iter()
        .filter(|r| r.message_type == MessageType::GetKeyRange)
        .count();
    assert!(listings >= 4);
}

#[test]
fn test_empty_range() {
    let sim = Simulator::start();
    let client = connect(&sim);

    assert_eq!(client.get_range(KeyRange::prefix("none")).count(), 0);
}

// =============================================================================
// Submission
// =============================================================================

#[test]
fn test_submit_with_callback() {
    let sim = Simulator::start();
    sim.insert(b"key", b"value");
    let client = connect(&sim);

    let (tx, rx) = crossbeam::channel::bounded(1);
    client
        .submit_with(kinetic::Operation::Get { key: b"key".to_vec() }, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    let entry = rx.recv().unwrap().unwrap().into_entry().unwrap().unwrap();
    assert_eq!(entry.value_bytes(), b"value");
}

#[test]
fn test_completion_can_call_back_into_client() {
    let sim = Simulator::start();
    let client = Arc::new(connect(&sim));

    let (tx, rx) = crossbeam::channel::bounded(1);
    let inner = client.clone();
    client
        .submit_with(kinetic::Operation::Noop, move |result| {
            let nested = inner.put("nested", "value");
            let _ = tx.send((result.is_ok(), nested));
        })
        .unwrap();

    let (first, nested) = rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .unwrap();
    assert!(first);
    nested.unwrap();
    assert_eq!(sim.value(b"nested"), Some(b"value".to_vec()));
    assert!(client.is_connected());
}

#[test]
fn test_pending_is_ready_after_sync_submit() {
    let sim = Simulator::start();
    let client = connect(&sim);

    let pending = client.put_async("key", "value", PutOptions::default()).unwrap();
    assert!(pending.is_ready());
    pending.wait().unwrap();
}

#[test]
fn test_validation_fails_before_io() {
    let sim = Simulator::start();
    let client = connect(&sim);

    let key = vec![b'k'; kinetic::MAX_KEY_SIZE + 1];
    assert!(matches!(
        client.put(&key, "v"),
        Err(KineticError::KeyTooLarge { .. })
    ));
    assert!(sim.received().is_empty());
}

// =============================================================================
// Device Status
// =============================================================================

#[test]
fn test_unsolicited_status_reaches_hook() {
    let sim = Simulator::with_options(SimOptions {
        unsolicited_first: true,
        ..Default::default()
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let seen = seen.clone();
        Hooks::new().on_unsolicited(move |status| seen.lock().push(status.code))
    };
    let client = BlockingClient::connect_with_hooks(sim.config(), hooks).unwrap();

    client.noop().unwrap();
    assert_eq!(*seen.lock(), vec![StatusCode::ServiceBusy]);
    assert!(client.is_connected());
}

#[test]
fn test_pinned_cluster_version_must_match() {
    let sim = Simulator::with_options(SimOptions {
        cluster_version: 3,
        ..Default::default()
    });

    let config = kinetic::ClientConfig {
        cluster_version: Some(5),
        ..sim.config()
    };
    match BlockingClient::connect(config).err() {
        Some(KineticError::ClusterVersionMismatch { actual, .. }) => assert_eq!(actual, 3),
        other => panic!("expected cluster version mismatch, got {:?}", other),
    }

    let config = kinetic::ClientConfig {
        cluster_version: Some(3),
        ..sim.config()
    };
    let client = BlockingClient::connect(config).unwrap();
    assert_eq!(client.cluster_version().unwrap(), 3);
}

#[test]
fn test_cluster_version_is_adopted() {
    let sim = Simulator::with_options(SimOptions {
        cluster_version: 9,
        ..Default::default()
    });
    let client = connect(&sim);

    assert_eq!(client.cluster_version().unwrap(), 9);
    client.put("key", "value").unwrap();
}

#[test]
fn test_device_version_change_then_reconnect() {
    let sim = Simulator::start();
    let client = connect(&sim);
    client.noop().unwrap();

    sim.set_cluster_version(7);
    match client.noop() {
        Err(KineticError::ClusterVersionMismatch { actual, .. }) => assert_eq!(actual, 7),
        other => panic!("expected cluster version mismatch, got {:?}", other),
    }
    assert!(client.is_connected());

    client.reconnect().unwrap();
    assert_eq!(client.cluster_version().unwrap(), 7);
    client.noop().unwrap();
}

#[test]
fn test_set_cluster_version() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.set_cluster_version(4).unwrap();
    assert_eq!(sim.cluster_version(), 4);
    assert_eq!(client.cluster_version().unwrap(), 4);

    client.put("key", "value").unwrap();
}

// =============================================================================
// Failures and Lifecycle
// =============================================================================

#[test]
fn test_bad_response_signature_faults() {
    let sim = Simulator::with_options(SimOptions {
        tamper_responses: true,
        ..Default::default()
    });
    let client = connect(&sim);

    assert!(matches!(
        client.noop(),
        Err(KineticError::Authentication(_))
    ));
    assert!(matches!(client.state(), ConnectionState::Faulted(_)));
    assert!(matches!(
        client.noop(),
        Err(KineticError::ConnectionFaulted(_))
    ));
}

#[test]
fn test_device_hang_up_faults() {
    let sim = Simulator::with_options(SimOptions {
        hang_up_after: Some(1),
        ..Default::default()
    });
    let client = connect(&sim);

    client.noop().unwrap();
    assert!(client.noop().unwrap_err().is_fatal());
    assert!(matches!(
        client.noop(),
        Err(KineticError::ConnectionFaulted(_))
    ));

    client.reconnect().unwrap();
    client.noop().unwrap();
}

#[test]
fn test_close_is_idempotent() {
    let sim = Simulator::start();
    let client = connect(&sim);

    client.close().unwrap();
    client.close().unwrap();
    assert!(matches!(client.state(), ConnectionState::Disconnected));
    assert!(matches!(client.noop(), Err(KineticError::NotConnected)));
}
