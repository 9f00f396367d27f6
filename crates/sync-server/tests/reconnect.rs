//! Gap backlog replay (spec §4.4, scenario D): a subscription that
//! resumes at a given revision is brought current by replaying exactly
//! the revisions it missed, not by a live fanout push.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_client::{ClientConfig, ClientConnection, NullObserver, ResourceConsumer, TcpConnector};
use sync_core::{BackingStore, Value};
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

#[tokio::test]
async fn gap_is_filled_by_backlog_replay_on_resubscribe() {
    let store = Arc::new(InMemoryStore::new());
    let state = ServerState::new(store.clone(), Arc::new(NoAuth));

    let listener = Listener::bind(ServerConfig::default()).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = listener.serve(state).await;
    });

    let first_consumer = Arc::new(CapturingConsumer::default());
    let first_conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(NullObserver))
        .await
        .expect("connect");
    let resource_id = first_conn.subscribe(first_consumer.clone(), serde_json::json!({ "kind": "appState" }), 0, None, "gap-a").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    first_conn.write(resource_id, "1:1:context.a", Value::number(1.0));
    first_conn.flush(resource_id).await.expect("flush");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let revision_after_first_write = store.range(resource_id, 0).await.iter().map(|e| e.revision).max().unwrap_or(0);

    // A second write lands while nothing is subscribed to observe it live,
    // the way activity from another client would during this connection's
    // outage window.
    store.append(resource_id, vec![("1:1:context.b".to_string(), Value::number(2.0))]).await.expect("append");

    // Reconnecting (here: a fresh connection, standing in for the same
    // client after its socket drops and comes back) resubscribes at the
    // last revision it had observed; the server must replay the gap.
    let second_consumer = Arc::new(CapturingConsumer::default());
    let second_conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(NullObserver))
        .await
        .expect("connect");
    second_conn
        .subscribe(second_consumer.clone(), serde_json::json!({ "kind": "appState" }), revision_after_first_write, None, "gap-b")
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let updates = second_consumer.updates.lock().unwrap();
    assert!(
        updates.iter().any(|(ident, value)| ident == "1:1:context.b" && *value == Value::number(2.0)),
        "expected the gap write to be replayed from backlog: {updates:?}"
    );
    assert!(
        !updates.iter().any(|(ident, _)| ident == "1:1:context.a"),
        "a resubscribe at revision_after_first_write must not replay what was already current: {updates:?}"
    );
}
