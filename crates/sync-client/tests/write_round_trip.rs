//! Exercises `ClientConnection` end to end against a hand-rolled mock
//! server built directly on `FramedConnection`, without depending on the
//! real server crate: subscribe, write, ack, and the resulting update
//! delivered back to the consumer (spec §4.4, scenario A).

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_client::{ClientConfig, ClientConnection, Connector, DuplexStream, NullObserver, ResourceConsumer};
use sync_core::framed::{ConnectionEvent, FramedConnection, FramedConnectionConfig};
use sync_core::message::Message;
use sync_core::{Envelope, Value};

struct OneShotConnector {
    client_half: Mutex<Option<tokio::io::DuplexStream>>,
    used: AtomicBool,
}

#[async_trait]
impl Connector for OneShotConnector {
    async fn connect(&self, _host: &str) -> io::Result<Box<dyn DuplexStream>> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "mock connector is one-shot"));
        }
        let half = self.client_half.lock().unwrap().take().expect("connect called exactly once");
        Ok(Box::new(half))
    }
}

#[derive(Default)]
struct CapturingConsumer {
    updates: Mutex<Vec<(String, Value)>>,
}

impl ResourceConsumer for CapturingConsumer {
    fn on_update(&self, ident: &str, value: &Value) {
        self.updates.lock().unwrap().push((ident.to_string(), value.clone()));
    }
}

/// Drives the server side of the pipe: replies to every `subscribe` with
/// an empty `resourceUpdate{revision:0}`, and to every `write` with a
/// `writeAck` at a monotonically increasing revision followed by a fanout
/// `resourceUpdate` carrying the same elements back.
async fn run_mock_server(server_half: tokio::io::DuplexStream) {
    let (framed, mut events) = FramedConnection::spawn(server_half, FramedConnectionConfig::default());
    let mut revision = 0u64;
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Message(inbound) => {
                let envelope = Envelope::from_json(&inbound.body).expect("valid envelope");
                match envelope.message {
                    Message::Subscribe { resource_id, .. } => {
                        let reply = Envelope::new(Message::ResourceUpdate {
                            resource_id,
                            revision,
                            update: Default::default(),
                        });
                        framed.send_message(resource_id, &reply.to_json()).unwrap();
                    }
                    Message::Write { resource_id, list, ack_id } => {
                        revision += 1;
                        let ack = Envelope::reply_to(
                            Message::WriteAck { ack_id, revision, info: None },
                            inbound.sequence_nr,
                        );
                        framed.send_message(resource_id, &ack.to_json()).unwrap();

                        let update = list.into_iter().map(|el| (el.ident, el)).collect();
                        let fanout = Envelope::new(Message::ResourceUpdate { resource_id, revision, update });
                        framed.send_message(resource_id, &fanout.to_json()).unwrap();
                    }
                    _ => {}
                }
            }
            ConnectionEvent::Closed(_) => return,
            _ => {}
        }
    }
}

#[tokio::test]
async fn subscribe_write_ack_and_update_round_trip() {
    let (client_half, server_half) = tokio::io::duplex(1 << 20);
    tokio::spawn(run_mock_server(server_half));

    let connector = Arc::new(OneShotConnector { client_half: Mutex::new(Some(client_half)), used: AtomicBool::new(false) });
    let conn = ClientConnection::connect("mock", connector, ClientConfig::default(), Arc::new(NullObserver))
        .await
        .expect("connect");

    let consumer = Arc::new(CapturingConsumer::default());
    let resource_id = conn.subscribe(consumer.clone(), serde_json::json!({ "kind": "appState" }), 0, None, "round-trip").unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    conn.write(resource_id, "1:1:context.x", Value::number(9.0));
    conn.flush(resource_id).await.expect("flush");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let updates = consumer.updates.lock().unwrap();
    assert!(
        updates.iter().any(|(ident, value)| ident == "1:1:context.x" && *value == Value::number(9.0)),
        "expected the written value to surface via the fanout resourceUpdate: {updates:?}"
    );
}
