#![allow(clippy::unwrap_used)]
// Integration tests for the device actor, driven over a live in-process
// broker the way a monitoring client would.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;

use zmon_api::{Broker, BrokerClient, DEVICE_STREAM, Delivery, DeliveryKind, Device, ProtoMessage};
use zmon_core::mailbox::{CNT_KEY, NOT_FOUND, REPLY_SUBJECT, SEQ_KEY, SUBJECT_NOT_FOUND};
use zmon_core::{CoreError, DeviceActor};

// ── Helpers ─────────────────────────────────────────────────────────

const ACTOR: &str = "it.zmon.device";
const TIMEOUT: Duration = Duration::from_secs(2);

fn zpl(endpoint: &str, file: Option<&Path>) -> String {
    let mut text = String::new();
    if let Some(file) = file {
        text.push_str(&format!("server\n    file = \"{}\"\n", file.display()));
    }
    text.push_str(&format!(
        "malamute\n    endpoint = {endpoint}\n    address = {ACTOR}\n    producer = {DEVICE_STREAM}\n    consumer\n        {DEVICE_STREAM} = .*\n"
    ));
    text
}

async fn client(endpoint: &str, address: &str) -> BrokerClient {
    BrokerClient::connect(endpoint, TIMEOUT, address).await.unwrap()
}

async fn started_actor(endpoint: &str, file: Option<&Path>) -> DeviceActor {
    let actor = DeviceActor::spawn();
    actor.configure(zpl(endpoint, file)).await.unwrap();
    actor.start().await.unwrap();
    actor
}

async fn next(client: &mut BrokerClient) -> Delivery {
    tokio::time::timeout(TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("broker link closed")
}

fn request(client: &BrokerClient, subject: &str, message: &ProtoMessage) {
    client
        .send_to(ACTOR, subject, message.encode().unwrap())
        .unwrap();
}

/// Send a request and decode the single reply.
async fn call(client: &mut BrokerClient, subject: &str, message: &ProtoMessage) -> ProtoMessage {
    request(client, subject, message);
    let reply = next(client).await;
    assert_eq!(reply.kind, DeliveryKind::Mailbox);
    assert_eq!(reply.sender, ACTOR);
    assert_eq!(reply.subject, REPLY_SUBJECT);
    ProtoMessage::decode(&reply.payload).unwrap()
}

fn device(name: &str) -> ProtoMessage {
    Device::new(name, 1_700_000_000_000, 1024).into()
}

// ── Scenario ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_lookup_and_bulk_queries() {
    let endpoint = "inproc://actor-test-scenario";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = started_actor(endpoint, None).await;

    let mut reader = client(endpoint, "reader").await;
    reader.set_consumer(DEVICE_STREAM, ".*").unwrap();
    let mut writer = client(endpoint, "writer").await;

    // INSERT is acknowledged and announced on the producer stream.
    assert_eq!(call(&mut writer, "INSERT", &device("device1")).await, ProtoMessage::ok());
    let announced = next(&mut reader).await;
    assert_eq!(announced.kind, DeliveryKind::Stream);
    assert_eq!(announced.address, DEVICE_STREAM);
    assert_eq!(announced.subject, "INSERT");
    assert_eq!(
        ProtoMessage::decode(&announced.payload).unwrap(),
        device("device1")
    );

    // LOOKUP returns the record unchanged.
    assert_eq!(call(&mut writer, "LOOKUP", &device("device1")).await, device("device1"));

    // GET-ALL streams one stamped copy back under LOOKUP.
    let all = call(&mut writer, "GET-ALL", &ProtoMessage::ok()).await;
    assert_eq!(all.device_name(), Some("device1"));
    assert_eq!(all.ext_int(SEQ_KEY, -1), 0);
    assert_eq!(all.ext_int(CNT_KEY, -1), 1);

    // PUBLISH-ALL broadcasts instead of replying.
    request(&writer, "PUBLISH-ALL", &ProtoMessage::ok());
    let published = next(&mut reader).await;
    assert_eq!(published.subject, "PUBLISH-ALL");
    let published = ProtoMessage::decode(&published.payload).unwrap();
    assert_eq!(published.device_name(), Some("device1"));
    assert_eq!(published.ext_int(SEQ_KEY, -1), 0);
    assert_eq!(published.ext_int(CNT_KEY, -1), 1);

    // Stored record was not stamped.
    assert_eq!(call(&mut writer, "LOOKUP", &device("device1")).await, device("device1"));
    assert!(writer.try_recv().is_none());

    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_publish_all_preserves_insertion_order() {
    let endpoint = "inproc://actor-test-publish-all";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = started_actor(endpoint, None).await;

    let mut reader = client(endpoint, "reader").await;
    reader.set_consumer(DEVICE_STREAM, "^PUBLISH-ALL$").unwrap();
    let mut writer = client(endpoint, "writer").await;

    let names = ["c", "a", "b"];
    for name in names {
        assert_eq!(call(&mut writer, "INSERT", &device(name)).await, ProtoMessage::ok());
    }
    request(&writer, "PUBLISH-ALL", &ProtoMessage::ok());

    for (seq, name) in names.iter().enumerate() {
        let message = ProtoMessage::decode(&next(&mut reader).await.payload).unwrap();
        assert_eq!(message.device_name(), Some(*name));
        assert_eq!(message.ext_int(SEQ_KEY, -1), i64::try_from(seq).unwrap());
        assert_eq!(message.ext_int(CNT_KEY, -1), 3);
    }

    actor.terminate().await.unwrap();
}

// ── Protocol errors ─────────────────────────────────────────────────

#[tokio::test]
async fn test_error_replies() {
    let endpoint = "inproc://actor-test-errors";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = started_actor(endpoint, None).await;
    let mut writer = client(endpoint, "writer").await;

    let reply = call(&mut writer, "GET-ALL", &ProtoMessage::ok()).await;
    assert_eq!(reply.error_code(), Some(NOT_FOUND));

    let reply = call(&mut writer, "LOOKUP", &device("ghost")).await;
    assert_eq!(reply.error_code(), Some(NOT_FOUND));

    let reply = call(&mut writer, "DELETE", &device("ghost")).await;
    assert_eq!(reply, ProtoMessage::ok());

    let reply = call(&mut writer, "SHUTDOWN", &device("ghost")).await;
    assert_eq!(reply.error_code(), Some(SUBJECT_NOT_FOUND));

    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_gets_no_reply() {
    let endpoint = "inproc://actor-test-malformed";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = started_actor(endpoint, None).await;
    actor.verbose().await.unwrap();
    let mut writer = client(endpoint, "writer").await;

    writer
        .send_to(ACTOR, "INSERT", Bytes::from_static(b"{ definitely not json"))
        .unwrap();

    // The next reply belongs to the next request.
    let reply = call(&mut writer, "LOOKUP", &device("device1")).await;
    assert_eq!(reply.error_code(), Some(NOT_FOUND));
    assert!(writer.try_recv().is_none());

    actor.terminate().await.unwrap();
}

// ── Control commands ────────────────────────────────────────────────

#[tokio::test]
async fn test_start_requires_configuration() {
    let endpoint = "inproc://actor-test-start";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = DeviceActor::spawn();

    let err = actor.start().await.unwrap_err();
    assert!(err.is_config(), "expected config error, got: {err:?}");

    actor
        .configure(format!("malamute\n    endpoint = {endpoint}\n"))
        .await
        .unwrap();
    let err = actor.start().await.unwrap_err();
    assert!(err.is_config(), "expected config error, got: {err:?}");

    let err = actor.configure("malamute\n\tendpoint = x\n").await.unwrap_err();
    assert!(matches!(err, CoreError::ConfigParse { line: 2, .. }));

    actor.configure(zpl(endpoint, None)).await.unwrap();
    actor.start().await.unwrap();
    assert!(actor.is_running());

    let mut writer = client(endpoint, "writer").await;
    assert_eq!(call(&mut writer, "INSERT", &device("device1")).await, ProtoMessage::ok());

    actor.terminate().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_without_broker() {
    let actor = DeviceActor::spawn();
    actor
        .configure(zpl("inproc://actor-test-no-broker", None))
        .await
        .unwrap();

    let err = actor.start().await.unwrap_err();
    assert!(
        matches!(err, CoreError::ConnectionFailed { .. }),
        "expected ConnectionFailed, got: {err:?}"
    );
    actor.verbose().await.unwrap();
    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_invalid_consumer_pattern_aborts_start() {
    let endpoint = "inproc://actor-test-bad-pattern";
    let _broker = Broker::bind(endpoint).unwrap();
    let actor = DeviceActor::spawn();
    actor
        .configure(format!(
            "malamute\n    endpoint = {endpoint}\n    address = {ACTOR}\n    consumer\n        {DEVICE_STREAM} = \"(\"\n"
        ))
        .await
        .unwrap();

    let err = actor.start().await.unwrap_err();
    assert!(matches!(err, CoreError::ConsumerFailed { .. }));
    assert!(err.is_connectivity());

    // The link itself stays up and keeps serving requests.
    let mut writer = client(endpoint, "writer").await;
    let reply = call(&mut writer, "LOOKUP", &device("device1")).await;
    assert_eq!(reply.error_code(), Some(NOT_FOUND));

    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let actor = DeviceActor::spawn();

    let err = actor.execute_frames(&["REBOOT"]).await.unwrap_err();
    assert!(matches!(err, CoreError::UnknownCommand(ref token) if token == "REBOOT"));
    let err = actor.execute_frames(&["CONFIG"]).await.unwrap_err();
    assert!(matches!(err, CoreError::MissingArgument { .. }));

    actor.execute_frames(&["VERBOSE"]).await.unwrap();
    actor.execute_frames(&["STOP"]).await.unwrap();
    actor.execute_frames(&["$TERM"]).await.unwrap();
}

#[tokio::test]
async fn test_commands_after_terminate_fail() {
    let actor = DeviceActor::spawn();
    actor.execute_frames(&["TERMINATE"]).await.unwrap();

    let err = actor.verbose().await.unwrap_err();
    assert!(matches!(err, CoreError::ActorStopped));
    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_broker_goes_away() {
    let endpoint = "inproc://actor-test-restart";
    let broker = Broker::bind(endpoint).unwrap();
    let actor = started_actor(endpoint, None).await;
    drop(broker);

    let _broker = Broker::bind(endpoint).unwrap();
    actor.start().await.unwrap();

    let mut writer = client(endpoint, "writer").await;
    assert_eq!(call(&mut writer, "INSERT", &device("device1")).await, ProtoMessage::ok());

    actor.stop().await.unwrap();
    actor.stop().await.unwrap();
    actor.terminate().await.unwrap();
}

// ── Persistence ─────────────────────────────────────────────────────

fn stored_names(path: &Path) -> Vec<String> {
    let devices: Vec<Device> = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    devices.into_iter().map(|d| d.name).collect()
}

#[tokio::test]
async fn test_terminate_flushes_registry() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("devices.json");
    let endpoint = "inproc://actor-test-flush";
    let _broker = Broker::bind(endpoint).unwrap();

    let actor = started_actor(endpoint, Some(&file)).await;
    let mut writer = client(endpoint, "writer").await;
    call(&mut writer, "INSERT", &device("device1")).await;
    call(&mut writer, "INSERT", &device("device2")).await;
    actor.terminate().await.unwrap();

    assert_eq!(stored_names(&file), ["device1", "device2"]);

    // A new actor picks the registry back up.
    let actor = started_actor(endpoint, Some(&file)).await;
    assert_eq!(call(&mut writer, "LOOKUP", &device("device2")).await, device("device2"));
    actor.terminate().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_flushes_to_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.json");
    let second = dir.path().join("b.json");
    let endpoint = "inproc://actor-test-reconfigure";
    let _broker = Broker::bind(endpoint).unwrap();

    let actor = started_actor(endpoint, Some(&first)).await;
    let mut writer = client(endpoint, "writer").await;
    call(&mut writer, "INSERT", &device("device1")).await;

    actor.configure(zpl(endpoint, Some(&second))).await.unwrap();
    assert_eq!(stored_names(&first), ["device1"]);

    // The registry now mirrors the new file, which has no devices yet.
    let reply = call(&mut writer, "LOOKUP", &device("device1")).await;
    assert_eq!(reply.error_code(), Some(NOT_FOUND));

    actor.terminate().await.unwrap();
    assert!(stored_names(&second).is_empty());
}
