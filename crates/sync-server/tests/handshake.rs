//! Pre-session handshake gate (spec §7 "authentication failure -> reject
//! handshake, client sees connect failure, no reconnect loop") against a
//! live TCP listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_client::{ClientConfig, ClientConnection, ConnectionStateCode, NullObserver, StatusWatcher, TcpConnector};
use sync_server::{HttpBasicAuth, InMemoryStore, Listener, ServerConfig, ServerState};

#[derive(Default)]
struct CapturingObserver {
    states: Mutex<Vec<(ConnectionStateCode, String)>>,
}

impl sync_client::ConnectionObserver for CapturingObserver {
    fn on_state(&self, code: ConnectionStateCode, reason: &str) {
        self.states.lock().unwrap().push((code, reason.to_string()));
    }
}

#[derive(Default)]
struct CapturingWatcher {
    seen: Mutex<Vec<(bool, Option<String>)>>,
    called: AtomicBool,
}

impl StatusWatcher for CapturingWatcher {
    fn on_login_status(&self, _username: &str, authenticated: bool, reason: Option<&str>, _login_seq_nr: u64) {
        self.called.store(true, Ordering::SeqCst);
        self.seen.lock().unwrap().push((authenticated, reason.map(|s| s.to_string())));
    }
}

async fn spawn_gated_server() -> std::net::SocketAddr {
    let store = Arc::new(InMemoryStore::new());
    let auth = Arc::new(HttpBasicAuth::new(|user: &str, pass: &str| user == "alice" && pass == "secret"));
    let state = ServerState::with_handshake_auth(store, auth, true);
    let listener = Listener::bind(ServerConfig::default()).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = listener.serve(state).await;
    });
    addr
}

#[tokio::test]
async fn failed_handshake_terminates_without_reconnect() {
    let addr = spawn_gated_server().await;
    let observer = Arc::new(CapturingObserver::default());
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), observer.clone())
        .await
        .expect("connect");
    let watcher = Arc::new(CapturingWatcher::default());
    conn.login("alice", "wrong-password", Some(watcher.clone())).unwrap();

    // Long enough to observe a reconnect attempt if one were (wrongly) made.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let seen = watcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].0, "wrong password must not authenticate");

    let states = observer.states.lock().unwrap();
    assert!(
        states.iter().any(|(code, _)| *code == ConnectionStateCode::Terminated),
        "expected a Terminated state after a failed handshake, saw {states:?}"
    );
    assert!(
        !states.iter().any(|(code, _)| *code == ConnectionStateCode::ClosedWillReconnect),
        "a failed handshake must not enter the reconnect loop, saw {states:?}"
    );
}

#[tokio::test]
async fn successful_handshake_lets_the_session_proceed() {
    let addr = spawn_gated_server().await;
    let observer = Arc::new(CapturingObserver::default());
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), observer.clone())
        .await
        .expect("connect");
    let watcher = Arc::new(CapturingWatcher::default());
    conn.login("alice", "secret", Some(watcher.clone())).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let seen = watcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0, "expected alice/secret to pass the handshake gate");

    let states = observer.states.lock().unwrap();
    assert!(
        !states.iter().any(|(code, _)| *code == ConnectionStateCode::Terminated),
        "a passing handshake must not terminate the connection, saw {states:?}"
    );

    drop(seen);
    drop(states);
    struct NullConsumer;
    impl sync_client::ResourceConsumer for NullConsumer {
        fn on_update(&self, _ident: &str, _value: &sync_core::Value) {}
    }
    conn.subscribe(Arc::new(NullConsumer), serde_json::json!({"kind": "appState"}), 0, None, "probe")
        .expect("subscribe should work normally once past the handshake gate");
}
