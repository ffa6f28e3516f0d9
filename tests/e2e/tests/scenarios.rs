//! Client ↔ scripted master scenarios over the in-memory bus

use std::time::Duration;

use connection::{parse_info, ConnectionError, ListenMode};
use e2e_tests::{next_data, MasterScript, TestBed};
use types::{
    Envelope, MessageKind, NetworkMessage, ProtocolVersion, SchemaVersion, ServiceMessageType,
    ADMIN_GROUP, IMPORT_GROUP, STATUS_GROUP,
};

const WAIT: Duration = Duration::from_secs(2);

fn pick(payload: &str) -> Envelope {
    Envelope::Data(NetworkMessage::new(
        MessageKind::Data,
        payload.as_bytes().to_vec(),
    ))
}

/// Read until the connection reports an error, returning it.
async fn read_until_error(client: &connection::SystemConnection) -> ConnectionError {
    loop {
        if let Err(e) = client.receive(true).await {
            return e;
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_handshake_v11_negotiates_groups_and_schema() {
    let bed = TestBed::new().unwrap();
    let master = bed
        .master(
            MasterScript::default()
                .with_groups(&[STATUS_GROUP, IMPORT_GROUP, "custom"])
                .with_schema_version(Some(SchemaVersion::new(2, 1))),
        )
        .await
        .unwrap();

    let client = bed.open(&bed.config("scautopick", "PICKER")).await.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.groups(), vec![STATUS_GROUP, IMPORT_GROUP, "custom"]);
    assert_eq!(client.schema_version(), SchemaVersion::new(0, 11));
    assert_eq!(client.private_master_group(), master.private_group());
    assert_eq!(client.private_group(), "#scautopick#e2e-bus");
    assert_eq!(bed.registry.registered(), vec![client.id()]);

    let requests = master.received_of(ServiceMessageType::ConnectGroup);
    assert_eq!(requests.len(), 1);
    let info = parse_info(&String::from_utf8_lossy(requests[0].payload()));
    assert_eq!(info["privategroup"], "#scautopick#e2e-bus");
}

#[test_log::test(tokio::test)]
async fn test_handshake_falls_back_to_v10() {
    let bed = TestBed::new().unwrap();
    let master = bed
        .master(
            MasterScript::default()
                .speaking(ProtocolVersion::V1_0)
                .with_groups(&["PICK"]),
        )
        .await
        .unwrap();

    let client = bed.open(&bed.config("scamp", "AMP")).await.unwrap();

    assert_eq!(client.groups(), vec![STATUS_GROUP, IMPORT_GROUP, "PICK"]);
    assert_eq!(client.schema_version(), SchemaVersion::default());
    assert_eq!(master.received_of(ServiceMessageType::ConnectGroup).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_master_times_out() {
    let bed = TestBed::new().unwrap();
    let _master = bed.master(MasterScript::default().silent()).await.unwrap();

    let client = bed.client(&bed.config("scevent", "EVENT"));
    let err = client
        .connect(bed.params("scevent", "EVENT"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Timeout { .. }));
    assert!(!client.is_connected());
    assert!(!bed.bus.members().contains(&"#scevent#e2e-bus".to_string()));
}

#[test_log::test(tokio::test)]
async fn test_send_to_unknown_group_never_reaches_master() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();
    let client = bed.open(&bed.config("scautopick", "PICKER")).await.unwrap();

    let err = client.send("NOWHERE", pick("x")).await.unwrap_err();
    assert!(matches!(err, ConnectionError::InvalidGroup { .. }));
    let err = client.send(ADMIN_GROUP, pick("x")).await.unwrap_err();
    assert!(matches!(err, ConnectionError::InvalidGroup { .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(master.data_received(), 0);
}

#[test_log::test(tokio::test)]
async fn test_publish_subscribe_without_echo() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();

    let mut publisher_config = bed.config("scautopick", "PICKER");
    publisher_config.subscriptions = vec!["PICK".into()];
    let publisher = bed.open(&publisher_config).await.unwrap();

    let mut subscriber_config = bed.config("scevent", "EVENT");
    subscriber_config.subscriptions = vec!["PICK".into()];
    let subscriber = bed.open(&subscriber_config).await.unwrap();

    publisher.send("PICK", pick("<pick id=\"1\"/>")).await.unwrap();

    let received = next_data(&subscriber, WAIT).await.unwrap();
    assert_eq!(received.payload(), b"<pick id=\"1\"/>");
    assert_eq!(received.destination(), "PICK");
    assert_eq!(received.private_sender_group(), publisher.private_group());
    assert_eq!(received.header().sequence_number(), 1);
    assert!(received.header().timestamp() > 0);

    // The publisher's own copy arrived with the subscriber's and was dropped.
    loop {
        match publisher.receive(false).await {
            Ok(envelope) => assert!(!envelope.is_data(), "publisher saw its own message"),
            Err(ConnectionError::NoData) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(master.history().len(), 1);
    assert_eq!(publisher.message_stats().sent_messages, 2);
}

#[test_log::test(tokio::test)]
async fn test_archive_replay_fills_gap_after_restart() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();
    let publisher = bed.open(&bed.config("scautopick", "PICKER")).await.unwrap();

    let mut receiver_config = bed.config("scevent", "EVENT");
    receiver_config.subscriptions = vec!["PICK".into()];
    let receiver = bed.open(&receiver_config).await.unwrap();

    publisher.send("PICK", pick("p1")).await.unwrap();
    let first = next_data(&receiver, WAIT).await.unwrap();
    assert_eq!(first.header().sequence_number(), 1);

    receiver.disconnect().await.unwrap();
    drop(receiver);

    publisher.send("PICK", pick("p2")).await.unwrap();
    publisher.send("PICK", pick("p3")).await.unwrap();
    assert!(master.wait_until(WAIT, |m| m.history().len() == 3).await);

    receiver_config.archive_groups = vec!["PICK".into()];
    receiver_config.request_archive = true;
    let restarted = bed.open(&receiver_config).await.unwrap();

    let mut replayed = Vec::new();
    for _ in 0..2 {
        let envelope = next_data(&restarted, WAIT).await.unwrap();
        assert!(envelope.header().is_archive());
        replayed.push(String::from_utf8_lossy(envelope.payload()).into_owned());
    }
    assert_eq!(replayed, vec!["p2", "p3"]);

    let request = master.received_of(ServiceMessageType::ArchiveRequest);
    assert_eq!(request.len(), 1);
    assert_eq!(request[0].as_service().unwrap().archive_sequence_number(), 1);
}

#[test_log::test(tokio::test)]
async fn test_master_loss_shuts_client_down() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();
    let client = bed.open(&bed.config("scmaster-watch", "EVENT")).await.unwrap();

    master.stop().await.unwrap();

    let err = tokio::time::timeout(WAIT, read_until_error(&client))
        .await
        .unwrap();
    assert!(matches!(err, ConnectionError::NotConnected));
    assert!(!client.is_connected());
}

#[test_log::test(tokio::test)]
async fn test_disconnect_command_is_returned_to_owner() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();
    let client = bed.open(&bed.config("scqc", "QC")).await.unwrap();
    let private_group = client.private_group();

    master.send_disconnect_command(&private_group).await.unwrap();

    let err = tokio::time::timeout(WAIT, read_until_error(&client))
        .await
        .unwrap();
    match err {
        ConnectionError::TerminateRequested { requested_by } => {
            assert_eq!(requested_by, master.private_group())
        }
        other => panic!("expected terminate request, got {other}"),
    }
    assert!(!client.is_connected());

    assert!(
        master
            .wait_until(WAIT, |m| {
                m.received_of(ServiceMessageType::ClientDisconnected)
                    .iter()
                    .any(|e| e.payload() == private_group.as_bytes())
            })
            .await
    );
}

#[test_log::test(tokio::test)]
async fn test_background_listener_answers_health_checks() {
    let bed = TestBed::new().unwrap();
    let master = bed.master(MasterScript::default()).await.unwrap();
    let client = bed.open(&bed.config("scimport", "IMPORT")).await.unwrap();

    assert_eq!(client.listen(ListenMode::Background).await, 0);
    master
        .send_health_check(&client.private_group())
        .await
        .unwrap();

    assert!(
        master
            .wait_until(WAIT, |m| {
                !m.received_of(ServiceMessageType::StateOfHealthResponse)
                    .is_empty()
            })
            .await
    );
    let response = &master.received_of(ServiceMessageType::StateOfHealthResponse)[0];
    assert_eq!(response.destination(), master.private_group());
    let info = parse_info(&String::from_utf8_lossy(response.payload()));
    assert_eq!(info["privategroup"], client.private_group());
    assert_eq!(info["pid"], std::process::id().to_string());

    // Joining a group queues a membership notice, which ends the current read.
    client.stop_listening();
    client.subscribe("PICK").await.unwrap();
    let tally = tokio::time::timeout(WAIT, client.join_listener())
        .await
        .unwrap();
    assert_eq!(tally, Some(0));
    assert!(!client.is_listening());
}

#[test_log::test(tokio::test)]
async fn test_reconnect_rejoins_groups() {
    let bed = TestBed::new().unwrap();
    let _master = bed.master(MasterScript::default()).await.unwrap();
    let publisher = bed.open(&bed.config("scautopick", "PICKER")).await.unwrap();

    let mut config = bed.config("scevent", "EVENT");
    config.subscriptions = vec!["PICK".into(), "LOCATION".into()];
    let client = bed.open(&config).await.unwrap();

    client.reconnect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.subscriptions().len(), 2);
    assert!(bed
        .bus
        .group_members("LOCATION")
        .contains(&client.private_group()));

    publisher.send("LOCATION", pick("origin")).await.unwrap();
    let received = next_data(&client, WAIT).await.unwrap();
    assert_eq!(received.payload(), b"origin");
}
