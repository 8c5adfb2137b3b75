//! Cooperative Client Tests
//!
//! The tokio-based client on the test runtime.

use futures::{pin_mut, StreamExt, TryStreamExt};
use tokio::runtime::Handle;

use kinetic::network::Hooks;
use kinetic::protocol::MessageType;
use kinetic::{AsyncClient, ClientConfig, Entry, KeyRange, KineticError};

use crate::common::{SimOptions, Simulator};

async fn connect(sim: &Simulator) -> AsyncClient {
    AsyncClient::connect(sim.config(), Hooks::default(), Handle::current())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_put_get_delete() {
    let sim = Simulator::start();
    let client = connect(&sim).await;

    client.put("key", "value").await.unwrap();
    let entry = client.get("key").await.unwrap().unwrap();
    assert_eq!(entry.value_bytes(), b"value");

    assert!(client.delete("key").await.unwrap());
    assert!(client.get("key").await.unwrap().is_none());
    assert!(!client.delete("key").await.unwrap());

    client.close(true).await.unwrap();
}

#[tokio::test]
async fn test_get_keys_in_order_under_reordering() {
    let sim = Simulator::with_options(SimOptions {
        reorder_window: 4,
        ..Default::default()
    });
    for i in 0..12 {
        sim.insert(format!("k{:02}", i).as_bytes(), &[i as u8]);
    }
    let client = connect(&sim).await;

    let keys: Vec<String> = (0..12).map(|i| format!("k{:02}", i)).collect();
    let results = client.get_keys(&keys, Some(6)).await;

    assert_eq!(results.len(), 12);
    for (i, result) in results.into_iter().enumerate() {
        let entry = result.unwrap().unwrap();
        assert_eq!(entry.key, keys[i].as_bytes());
        assert_eq!(entry.value_bytes(), &[i as u8]);
    }

    client.close(true).await.unwrap();
}

#[tokio::test]
async fn test_bulk_put_and_range() {
    let sim = Simulator::start();
    let client = connect(&sim).await;

    let entries = (0..9).map(|i| Entry::new(format!("row{}", i), format!("v{}", i)));
    assert_eq!(client.put_entries(entries, None).await.unwrap(), 9);

    let keys = client
        .get_key_range(&KeyRange::prefix("row"), 100, false)
        .await
        .unwrap();
    assert_eq!(keys.len(), 9);

    let rows: Vec<Entry> = client
        .get_range(KeyRange::prefix("row"))
        .try_collect()
        .await
        .unwrap();
    let values: Vec<&[u8]> = rows.iter().map(|e| e.value_bytes()).collect();
    assert_eq!(values.len(), 9);
    assert_eq!(values[0], b"v0");
    assert_eq!(values[8], b"v8");

    client.close(false).await.unwrap();
}

#[tokio::test]
async fn test_range_is_listed_a_page_at_a_time() {
    let sim = Simulator::start();
    for i in 0..9 {
        sim.insert(format!("row{}", i).as_bytes(), format!("v{}", i).as_bytes());
    }
    let config = ClientConfig {
        range_page_size: 4,
        range_prefetch: 3,
        ..sim.config()
    };
    let client = AsyncClient::connect(config, Hooks::default(), Handle::current())
        .await
        .unwrap();
    let listings = |sim: &Simulator| {
        sim.received()
            .iter()
            .filter(|r| r.message_type == MessageType::GetKeyRange)
            .count()
    };

    let rows = client.get_range(KeyRange::prefix("row"));
    pin_mut!(rows);

    let first = rows.next().await.unwrap().unwrap();
    assert_eq!(first.key, b"row0");
    assert_eq!(listings(&sim), 1);

    let mut keys = vec![first.key];
    while let Some(entry) = rows.next().await {
        keys.push(entry.unwrap().key);
    }
    let expected: Vec<Vec<u8>> = (0..9).map(|i| format!("row{}", i).into_bytes()).collect();
    assert_eq!(keys, expected);
    assert_eq!(listings(&sim), 3);

    client.close(false).await.unwrap();
}

#[tokio::test]
async fn test_batch_commit_and_abort() {
    let sim = Simulator::start();
    let client = connect(&sim).await;

    let mut batch = client.begin_batch().await.unwrap();
    batch.put("a", "1").await.unwrap();
    batch.put("b", "2").await.unwrap();
    batch.commit().await.unwrap();
    assert!(matches!(
        batch.put("c", "3").await,
        Err(KineticError::BatchCompleted)
    ));
    assert_eq!(sim.len(), 2);

    let mut batch = client.begin_batch().await.unwrap();
    batch.delete("a").await.unwrap();
    batch.abort().await.unwrap();
    assert_eq!(sim.value(b"a"), Some(b"1".to_vec()));

    client.close(true).await.unwrap();
}

#[tokio::test]
async fn test_bad_response_signature_faults() {
    let sim = Simulator::with_options(SimOptions {
        tamper_responses: true,
        ..Default::default()
    });
    let client = connect(&sim).await;

    assert!(client.noop().await.unwrap_err().is_fatal());
    assert!(matches!(
        client.noop().await,
        Err(KineticError::ConnectionFaulted(_))
    ));
}

#[tokio::test]
async fn test_closed_client_refuses_work() {
    let sim = Simulator::start();
    let client = connect(&sim).await;

    client.noop().await.unwrap();
    client.close(true).await.unwrap();
    client.close(true).await.unwrap();

    assert!(client.noop().await.is_err());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_cluster_version_follows_setup() {
    let sim = Simulator::start();
    let client = connect(&sim).await;

    client.set_cluster_version(12).await.unwrap();
    assert_eq!(client.cluster_version(), 12);
    assert_eq!(sim.cluster_version(), 12);
    client.put("key", "value").await.unwrap();

    client.close(true).await.unwrap();
}
