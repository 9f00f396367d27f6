//! Reassembly across an arbitrary number of chunks (spec §8 invariant 2)
//! and the literal chunked-message walkthrough from scenario B.

use sync_core::framed::{ConnectionEvent, FramedConnection, FramedConnectionConfig};

fn config_with_max_buffer(max_buffer: usize) -> FramedConnectionConfig {
    FramedConnectionConfig { max_buffer, pool_size: 1, ..FramedConnectionConfig::default() }
}

#[tokio::test]
async fn scenario_b_chunked_message_reassembles_bit_identical() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let config = config_with_max_buffer(16_000);
    let (sender, mut sender_events) = FramedConnection::spawn(client_io, config.clone());
    let (_receiver, mut receiver_events) = FramedConnection::spawn(server_io, config);

    // Drain the synthetic Open events both ends emit on spawn.
    assert!(matches!(sender_events.recv().await, Some(ConnectionEvent::Open)));
    assert!(matches!(receiver_events.recv().await, Some(ConnectionEvent::Open)));

    let body = serde_json::json!({ "padding": "x".repeat(40_000 - 20), "tag": "scenario-b" });
    sender.send_message(7, &body).unwrap();

    let mut progresses = Vec::new();
    let message = loop {
        match receiver_events.recv().await.expect("receiver channel closed") {
            ConnectionEvent::Progress { received_so_far, .. } => progresses.push(received_so_far),
            ConnectionEvent::Message(msg) => break msg,
            other => panic!("unexpected event: {other:?}"),
        }
    };

    assert_eq!(message.resource_id, 7);
    assert_eq!(message.body, body, "reassembled body must be bit-identical to the original");
    assert!(progresses.len() >= 3, "expected at least 3 buffers for a 40000-byte body over a 16000-byte limit");
    assert_eq!(*progresses.last().unwrap(), progresses.iter().copied().max().unwrap());
}

#[tokio::test]
async fn many_small_chunks_still_reassemble() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let config = config_with_max_buffer(64);
    let (sender, mut sender_events) = FramedConnection::spawn(client_io, config.clone());
    let (_receiver, mut receiver_events) = FramedConnection::spawn(server_io, config);

    assert!(matches!(sender_events.recv().await, Some(ConnectionEvent::Open)));
    assert!(matches!(receiver_events.recv().await, Some(ConnectionEvent::Open)));

    let body = serde_json::json!({ "data": "y".repeat(2_000) });
    sender.send_message(1, &body).unwrap();

    let message = loop {
        match receiver_events.recv().await.expect("receiver channel closed") {
            ConnectionEvent::Progress { .. } => continue,
            ConnectionEvent::Message(msg) => break msg,
            other => panic!("unexpected event: {other:?}"),
        }
    };
    assert_eq!(message.body, body);
}
