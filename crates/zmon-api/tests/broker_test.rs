#![allow(clippy::unwrap_used)]
// Integration tests for the in-process broker.

use std::time::Duration;

use bytes::Bytes;

use zmon_api::{Broker, BrokerClient, DeliveryKind, Error};

// ── Helpers ─────────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_millis(200);

async fn client(endpoint: &str, address: &str) -> BrokerClient {
    BrokerClient::connect(endpoint, TIMEOUT, address).await.unwrap()
}

// ── Connection tests ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_broker() {
    let result = BrokerClient::connect("inproc://broker-test-absent", TIMEOUT, "a").await;
    assert!(
        matches!(result, Err(Error::Timeout { .. })),
        "expected Timeout, got: {result:?}"
    );
}

#[tokio::test]
async fn test_connect_rejects_foreign_scheme() {
    let result = BrokerClient::connect("tcp://localhost:9999", TIMEOUT, "a").await;
    assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
}

#[tokio::test]
async fn test_client_drop_releases_mailbox() {
    let broker = Broker::bind("inproc://broker-test-drop").unwrap();
    let a = client("inproc://broker-test-drop", "a").await;
    assert_eq!(broker.client_count(), 1);

    drop(a);
    assert_eq!(broker.client_count(), 0);
}

#[tokio::test]
async fn test_recv_ends_when_broker_dropped() {
    let broker = Broker::bind("inproc://broker-test-gone").unwrap();
    let mut a = client("inproc://broker-test-gone", "a").await;

    drop(broker);
    assert!(a.recv().await.is_none());
    assert!(matches!(
        a.send_to("b", "HELLO", Bytes::new()),
        Err(Error::Disconnected)
    ));
}

// ── Mailbox tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_mailbox_delivery_carries_sender() {
    let _broker = Broker::bind("inproc://broker-test-mailbox").unwrap();
    let mut a = client("inproc://broker-test-mailbox", "a").await;
    let b = client("inproc://broker-test-mailbox", "b").await;

    b.send_to("a", "LOOKUP", Bytes::from_static(b"hi")).unwrap();

    let delivery = a.recv().await.unwrap();
    assert_eq!(delivery.kind, DeliveryKind::Mailbox);
    assert_eq!(delivery.sender, "b");
    assert_eq!(delivery.address, "a");
    assert_eq!(delivery.subject, "LOOKUP");
    assert_eq!(&delivery.payload[..], b"hi");
}

#[tokio::test]
async fn test_mailbox_to_unknown_address_fails() {
    let _broker = Broker::bind("inproc://broker-test-unknown").unwrap();
    let a = client("inproc://broker-test-unknown", "a").await;

    let result = a.send_to("nobody", "LOOKUP", Bytes::new());
    assert!(matches!(result, Err(Error::UnknownAddress(addr)) if addr == "nobody"));
}

#[tokio::test]
async fn test_address_takeover_closes_old_client() {
    let _broker = Broker::bind("inproc://broker-test-takeover").unwrap();
    let mut old = client("inproc://broker-test-takeover", "dup").await;
    old.set_consumer("s", ".*").unwrap();
    let mut new = client("inproc://broker-test-takeover", "dup").await;

    assert!(old.recv().await.is_none());

    let sender = client("inproc://broker-test-takeover", "sender").await;
    sender.send_to("dup", "PING", Bytes::new()).unwrap();
    assert_eq!(new.recv().await.unwrap().subject, "PING");

    // Dropping the stale client must not unregister the new one.
    drop(old);
    sender.send_to("dup", "PING", Bytes::new()).unwrap();
    assert!(new.recv().await.is_some());
}

// ── Stream tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_requires_producer() {
    let _broker = Broker::bind("inproc://broker-test-noproducer").unwrap();
    let a = client("inproc://broker-test-noproducer", "a").await;
    assert!(matches!(a.send("INSERT", Bytes::new()), Err(Error::NoProducer)));
}

#[tokio::test]
async fn test_stream_pattern_filters_subjects() {
    let endpoint = "inproc://broker-test-pattern";
    let _broker = Broker::bind(endpoint).unwrap();
    let mut inserts = client(endpoint, "inserts").await;
    inserts.set_consumer("devices", "^INSERT$").unwrap();
    let mut all = client(endpoint, "all").await;
    all.set_consumer("devices", ".*").unwrap();

    let mut writer = client(endpoint, "writer").await;
    writer.set_producer("devices").unwrap();

    assert_eq!(writer.send("INSERT", Bytes::from_static(b"1")).unwrap(), 2);
    assert_eq!(writer.send("DELETE", Bytes::from_static(b"2")).unwrap(), 1);

    let first = inserts.recv().await.unwrap();
    assert_eq!(first.kind, DeliveryKind::Stream);
    assert_eq!(first.address, "devices");
    assert_eq!(first.sender, "writer");
    assert_eq!(first.subject, "INSERT");
    assert!(inserts.try_recv().is_none());

    assert_eq!(all.recv().await.unwrap().subject, "INSERT");
    assert_eq!(all.recv().await.unwrap().subject, "DELETE");
}

#[tokio::test]
async fn test_overlapping_patterns_deliver_once() {
    let endpoint = "inproc://broker-test-overlap";
    let _broker = Broker::bind(endpoint).unwrap();
    let mut reader = client(endpoint, "reader").await;
    reader.set_consumer("devices", ".*").unwrap();
    reader.set_consumer("devices", "INSERT").unwrap();

    let mut writer = client(endpoint, "writer").await;
    writer.set_producer("devices").unwrap();
    writer.send("INSERT", Bytes::new()).unwrap();

    assert!(reader.recv().await.is_some());
    assert!(reader.try_recv().is_none());
}

#[tokio::test]
async fn test_invalid_pattern_is_rejected() {
    let _broker = Broker::bind("inproc://broker-test-badpattern").unwrap();
    let mut a = client("inproc://broker-test-badpattern", "a").await;
    let result = a.set_consumer("devices", "(unclosed");
    assert!(matches!(result, Err(Error::InvalidPattern { .. })));
}
