//! Threaded Client Tests
//!
//! Pipelined requests over a writer thread and a reader thread.

use std::sync::Arc;
use std::time::Duration;

use kinetic::operations::PutOptions;
use kinetic::{ConnectionState, Entry, KineticError, Operation, Outcome, ThreadedClient};

use crate::common::{SimOptions, Simulator};

fn reordering() -> Simulator {
    Simulator::with_options(SimOptions {
        reorder_window: 4,
        ..Default::default()
    })
}

#[test]
fn test_put_get_delete() {
    let sim = Simulator::start();
    let client = ThreadedClient::connect(sim.config()).unwrap();

    client.put("key", "value").unwrap();
    assert_eq!(client.get("key").unwrap().unwrap().value_bytes(), b"value");
    assert!(client.delete("key").unwrap());
    assert!(client.get("key").unwrap().is_none());
}

#[test]
fn test_out_of_order_responses_complete_their_own_requests() {
    let sim = reordering();
    for i in 0..8 {
        sim.insert(format!("k{}", i).as_bytes(), format!("v{}", i).as_bytes());
    }
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let pending: Vec<_> = (0..8)
        .map(|i| client.get_async(format!("k{}", i)).unwrap())
        .collect();

    for (i, pending) in pending.into_iter().enumerate().rev() {
        let entry = pending.wait().unwrap().unwrap();
        assert_eq!(entry.key, format!("k{}", i).into_bytes());
        assert_eq!(entry.value_bytes(), format!("v{}", i).as_bytes());
    }
}

#[test]
fn test_get_keys_preserves_input_order() {
    let sim = reordering();
    for i in 0..20 {
        sim.insert(format!("key{:02}", i).as_bytes(), &[i as u8]);
    }
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let keys: Vec<String> = (0..22).map(|i| format!("key{:02}", i)).collect();
    let results: Vec<_> = client.get_keys(&keys, Some(8)).collect();

    assert_eq!(results.len(), 22);
    for (i, result) in results.into_iter().enumerate() {
        match result.unwrap() {
            Some(entry) => {
                assert!(i < 20);
                assert_eq!(entry.value_bytes(), &[i as u8]);
            }
            None => assert!(i >= 20),
        }
    }
}

#[test]
fn test_bulk_put_and_delete() {
    let sim = reordering();
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let entries = (0..10).map(|i| Entry::new(format!("bulk{}", i), format!("v{}", i)));
    assert_eq!(client.put_entries(entries, Some(4)).unwrap(), 10);
    assert_eq!(sim.len(), 10);

    let keys = ["bulk0", "missing", "bulk9"];
    let deleted: Vec<bool> = client
        .delete_keys(keys, Some(2))
        .collect::<kinetic::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(deleted, vec![true, false, true]);
    assert_eq!(sim.len(), 8);
}

#[test]
fn test_pending_wait_timeout() {
    let sim = Simulator::start();
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let pending = client.put_async("key", "value", PutOptions::default()).unwrap();
    let result = match pending.wait_timeout(Duration::from_secs(5)) {
        Ok(result) => result,
        Err(_) => panic!("put did not complete"),
    };
    result.unwrap();
}

#[test]
fn test_bad_response_signature_fails_everything_in_flight() {
    let sim = Simulator::with_options(SimOptions {
        tamper_responses: true,
        reorder_window: 3,
        ..Default::default()
    });
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let pending: Vec<_> = (0..3).map(|_| client.submit(kinetic::Operation::Noop).unwrap()).collect();
    for pending in pending {
        let err = pending.wait().unwrap_err();
        assert!(err.is_fatal() || matches!(err, KineticError::ConnectionFaulted(_)));
    }

    assert!(matches!(client.state(), ConnectionState::Faulted(_)));
    assert!(matches!(
        client.noop(),
        Err(KineticError::ConnectionFaulted(_))
    ));
}

#[test]
fn test_device_hang_up_fails_pending() {
    let sim = Simulator::with_options(SimOptions {
        hang_up_after: Some(2),
        ..Default::default()
    });
    let client = ThreadedClient::connect(sim.config()).unwrap();

    client.noop().unwrap();
    client.noop().unwrap();
    assert!(client.noop().unwrap_err().is_fatal());
    assert!(!client.is_connected());
}

#[test]
fn test_graceful_close_completes_outstanding() {
    let sim = reordering();
    let client = ThreadedClient::connect(sim.config()).unwrap();

    let pending: Vec<_> = (0..6)
        .map(|i| {
            client
                .put_async(format!("k{}", i), "v", PutOptions::default())
                .unwrap()
        })
        .collect();
    client.close_gracefully().unwrap();

    for pending in pending {
        pending.wait().unwrap();
    }
    assert_eq!(sim.len(), 6);
    assert!(matches!(client.state(), ConnectionState::Disconnected));
    assert!(matches!(client.noop(), Err(KineticError::NotConnected)));
}

#[test]
fn test_tls_is_refused() {
    let sim = Simulator::start();
    let config = kinetic::ClientConfig {
        tls: Some(kinetic::TlsOptions::default()),
        ..sim.config()
    };
    assert!(matches!(
        ThreadedClient::connect(config).err(),
        Some(KineticError::Config(_))
    ));
}

// =============================================================================
// Completions
// =============================================================================

#[test]
fn test_completion_may_submit_more_work() {
    let sim = Simulator::start();
    sim.insert(b"key", b"value");
    let client = Arc::new(ThreadedClient::connect(sim.config()).unwrap());

    let (tx, rx) = crossbeam::channel::bounded(1);
    let inner = client.clone();
    client
        .submit_with(Operation::Noop, move |_| {
            let get = Operation::Get { key: b"key".to_vec() };
            let submitted = inner.submit_with(get, move |result| {
                let _ = tx.send(result.and_then(Outcome::into_entry));
            });
            assert!(submitted.is_ok());
        })
        .unwrap();

    let entry = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap().unwrap();
    assert_eq!(entry.value_bytes(), b"value");
}

#[test]
fn test_blocking_inside_completion_fails_fast() {
    let sim = Simulator::start();
    let client = Arc::new(ThreadedClient::connect(sim.config()).unwrap());

    let (tx, rx) = crossbeam::channel::bounded(1);
    let inner = client.clone();
    client
        .submit_with(Operation::Noop, move |_| {
            let _ = tx.send(inner.noop());
        })
        .unwrap();

    let nested = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(nested, Err(KineticError::BlockingInCompletion)));

    // The connection keeps working
    client.put("after", "value").unwrap();
    assert_eq!(client.get("after").unwrap().unwrap().value_bytes(), b"value");
    assert!(matches!(client.state(), ConnectionState::Connected));
}

// =============================================================================
// Pipeline depth
// =============================================================================

fn holding() -> Simulator {
    let sim = Simulator::with_options(SimOptions {
        reorder_window: 100,
        ..Default::default()
    });
    for i in 0..12 {
        sim.insert(format!("k{:02}", i).as_bytes(), b"v");
    }
    sim
}

#[test]
fn test_bulk_helpers_default_to_configured_depth() {
    let keys: Vec<String> = (0..12).map(|i| format!("k{:02}", i)).collect();

    let sim = holding();
    let config = kinetic::ClientConfig {
        pipeline_depth: 3,
        ..sim.config()
    };
    let client = ThreadedClient::connect(config).unwrap();
    let results: Vec<_> = client.get_keys(&keys, None).collect();
    assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));
    assert!(sim.max_held() <= 3);

    let sim = holding();
    let client = ThreadedClient::connect(sim.config()).unwrap();
    let results: Vec<_> = client.get_keys(&keys, Some(6)).collect();
    assert_eq!(results.len(), 12);
    assert!(sim.max_held() > 3);
}
