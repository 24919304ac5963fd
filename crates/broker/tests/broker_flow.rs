//! End-to-end routing behavior against real (temporary) databases

use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;

use dataplane_broker::command::{
    ACK_MIN, CMD_CREATE, METADATA_HUMAN_NAME, NAK_C_BADREQ, NAK_C_CONFLICT, NAK_S_NOTIMPL,
    serialize_metadata,
};
use dataplane_broker::{
    Address, BrokerError, CommandPayload, CreationBroker, DedupStore, NameDirectory, Pdu,
    PoolConfig, SERVICE_NAME,
};

fn quick_pool() -> PoolConfig {
    PoolConfig {
        size: 4,
        retries: 2,
        retry_delay: Duration::from_millis(5),
    }
}

async fn open_store(dir: &TempDir) -> DedupStore {
    DedupStore::open(dir.path().join("dedup.db"), &quick_pool())
        .await
        .unwrap()
}

fn service_addr() -> Address {
    Address::from_human_name(SERVICE_NAME)
}

fn create_payload(rid: i64, human_name: Option<&str>, extra: &[u8]) -> CommandPayload {
    let mut entries = Vec::new();
    if let Some(human_name) = human_name {
        entries.push((METADATA_HUMAN_NAME, Bytes::copy_from_slice(human_name.as_bytes())));
    }
    entries.push((0x0000_0001, Bytes::copy_from_slice(extra)));
    CommandPayload::new(CMD_CREATE, rid, serialize_metadata(&entries))
}

fn pdu_from(src: Address, payload: &CommandPayload) -> Pdu {
    Pdu::new(src, service_addr(), payload.encode())
}

#[tokio::test]
async fn test_admit_is_at_most_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let local = store.admit("logA", "srv1", "clientX", 42).await.unwrap();
    assert_eq!(local, 1);

    assert!(matches!(
        store.admit("logA", "srv2", "clientY", 99).await,
        Err(BrokerError::Conflict)
    ));

    // A different log name is unaffected
    assert_eq!(store.admit("logB", "srv1", "clientZ", 7).await.unwrap(), 2);
}

#[tokio::test]
async fn test_resolve_succeeds_once_then_rejects() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let local = store.admit("logA", "srv1", "clientX", 42).await.unwrap();

    let (creator, original_rid) = store.resolve(local).await.unwrap();
    assert_eq!(creator, "clientX");
    assert_eq!(original_rid, 42);

    assert!(matches!(
        store.resolve(local).await,
        Err(BrokerError::UnknownResponse(_))
    ));
    assert!(matches!(
        store.resolve(12345).await,
        Err(BrokerError::UnknownResponse(_))
    ));
}

#[tokio::test]
async fn test_create_is_forwarded_and_response_spliced_back() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let client = Address::from_human_name("client.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let request = create_payload(42, None, b"log one");
    let forwarded = broker
        .route_request(&pdu_from(client, &request))
        .await
        .expect("create should be forwarded");

    assert_eq!(forwarded.dst, server);
    assert_eq!(forwarded.src, service_addr());
    let forwarded_payload = CommandPayload::decode(&forwarded.data).unwrap();
    assert_eq!(forwarded_payload.cmd, CMD_CREATE);
    assert_eq!(forwarded_payload.rid, 1);
    assert_eq!(forwarded_payload.metadata, request.metadata);

    // The backend acknowledges using the broker's correlation id
    let ack = CommandPayload::new(ACK_MIN, forwarded_payload.rid, Bytes::new());
    let reply = broker
        .route_request(&pdu_from(server, &ack))
        .await
        .expect("response should be spliced back");

    assert_eq!(reply.dst, client);
    assert_eq!(reply.src, service_addr());
    let reply_payload = CommandPayload::decode(&reply.data).unwrap();
    assert_eq!(reply_payload.cmd, ACK_MIN);
    assert_eq!(reply_payload.rid, 42);
}

#[tokio::test]
async fn test_duplicate_create_is_never_forwarded() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let first_client = Address::from_human_name("client one");
    let second_client = Address::from_human_name("client two");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let request = create_payload(42, None, b"the same log");
    let forwarded = broker
        .route_request(&pdu_from(first_client, &request))
        .await
        .unwrap();
    assert_eq!(forwarded.dst, server);

    // Identical derived log name from a different client
    let duplicate = create_payload(99, None, b"the same log");
    let nak = broker
        .route_request(&pdu_from(second_client, &duplicate))
        .await
        .unwrap();

    assert_eq!(nak.dst, second_client);
    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_C_CONFLICT);
    assert_eq!(nak_payload.rid, 99);
}

#[tokio::test]
async fn test_command_from_a_server_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let request = create_payload(1, None, b"x");
    let nak = broker
        .route_request(&pdu_from(server, &request))
        .await
        .unwrap();

    assert_eq!(nak.dst, server);
    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_C_BADREQ);
}

#[tokio::test]
async fn test_non_create_command_is_not_implemented() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let client = Address::from_human_name("client.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let payload = CommandPayload::new(5, 1, Bytes::new());
    let nak = broker
        .route_request(&pdu_from(client, &payload))
        .await
        .unwrap();

    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_S_NOTIMPL);
}

#[tokio::test]
async fn test_response_from_unregistered_address_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let imposter = Address::from_human_name("imposter");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let ack = CommandPayload::new(ACK_MIN, 1, Bytes::new());
    let nak = broker
        .route_request(&pdu_from(imposter, &ack))
        .await
        .unwrap();

    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_C_BADREQ);
}

#[tokio::test]
async fn test_unmatched_response_gets_nak_not_crash() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let ack = CommandPayload::new(ACK_MIN, 777, Bytes::new());
    let nak = broker
        .route_request(&pdu_from(server, &ack))
        .await
        .unwrap();

    assert_eq!(nak.dst, server);
    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_C_BADREQ);
}

#[tokio::test]
async fn test_router_nak_is_dropped() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let client = Address::from_human_name("client.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let payload = CommandPayload::new(245, 1, Bytes::new());
    assert!(broker.route_request(&pdu_from(client, &payload)).await.is_none());
}

#[tokio::test]
async fn test_undecodable_payload_is_dropped() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let client = Address::from_human_name("client.example.net");
    let broker = CreationBroker::new(open_store(&dir).await, None, vec![server]);

    let pdu = Pdu::new(client, service_addr(), Bytes::from_static(b"\x42\x00"));
    assert!(broker.route_request(&pdu).await.is_none());
}

#[tokio::test]
async fn test_human_name_is_registered_in_directory() {
    let dir = TempDir::new().unwrap();
    let server = Address::from_human_name("logd.example.net");
    let client = Address::from_human_name("client.example.net");

    let directory = NameDirectory::open(dir.path().join("names.db"), &quick_pool())
        .await
        .unwrap();
    let broker = CreationBroker::new(
        open_store(&dir).await,
        Some(directory),
        vec![server],
    );

    let request = create_payload(42, Some("edu.example.sensor.01"), b"log one");
    let (_, expected_logname) = request.extract_name();
    let forwarded = broker
        .route_request(&pdu_from(client, &request))
        .await
        .unwrap();
    assert_eq!(forwarded.dst, server);

    // A second create reusing the human name (but naming a different
    // log) is stopped by the directory before admission
    let second = create_payload(7, Some("edu.example.sensor.01"), b"other log");
    let nak = broker
        .route_request(&pdu_from(client, &second))
        .await
        .unwrap();
    let nak_payload = CommandPayload::decode(&nak.data).unwrap();
    assert_eq!(nak_payload.cmd, NAK_C_CONFLICT);

    // The recorded mapping points at the first log
    let broker_directory = NameDirectory::open(dir.path().join("names.db"), &quick_pool())
        .await
        .unwrap();
    let mapped = broker_directory
        .lookup("edu.example.sensor.01")
        .await
        .unwrap();
    assert_eq!(mapped, Some(expected_logname));
}
