//! Login / create-account round trip against a live TCP listener (spec
//! §6 login protocol).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_client::{ClientConfig, ClientConnection, ConnectionStateCode, NullObserver, StatusWatcher, TcpConnector};
use sync_server::{HttpBasicAuth, InMemoryStore, Listener, ServerConfig, ServerState};

struct CapturingObserver;
impl sync_client::ConnectionObserver for CapturingObserver {
    fn on_state(&self, _code: ConnectionStateCode, _reason: &str) {}
}

#[derive(Default)]
struct CapturingWatcher {
    seen: Mutex<Vec<(String, bool, Option<String>)>>,
    called: AtomicBool,
}

impl StatusWatcher for CapturingWatcher {
    fn on_login_status(&self, username: &str, authenticated: bool, reason: Option<&str>, _login_seq_nr: u64) {
        self.called.store(true, Ordering::SeqCst);
        self.seen.lock().unwrap().push((username.to_string(), authenticated, reason.map(|s| s.to_string())));
    }
}

async fn spawn_server_with_auth() -> std::net::SocketAddr {
    let store = Arc::new(InMemoryStore::new());
    let auth = Arc::new(HttpBasicAuth::new(|user: &str, pass: &str| user == "alice" && pass == "secret"));
    let state = ServerState::new(store, auth);
    let listener = Listener::bind(ServerConfig::default()).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = listener.serve(state).await;
    });
    addr
}

#[tokio::test]
async fn valid_credentials_authenticate() {
    let addr = spawn_server_with_auth().await;
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(CapturingObserver))
        .await
        .expect("connect");
    let watcher = Arc::new(CapturingWatcher::default());
    conn.login("alice", "secret", Some(watcher.clone())).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let seen = watcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "alice");
    assert!(seen[0].1, "expected alice/secret to authenticate");
}

#[tokio::test]
async fn invalid_credentials_are_rejected() {
    let addr = spawn_server_with_auth().await;
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(CapturingObserver))
        .await
        .expect("connect");
    let watcher = Arc::new(CapturingWatcher::default());
    conn.login("alice", "wrong-password", Some(watcher.clone())).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let seen = watcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].1, "wrong password must not authenticate");
}

#[tokio::test]
async fn create_account_is_always_declined() {
    let addr = spawn_server_with_auth().await;
    let conn = ClientConnection::connect(addr.to_string(), Arc::new(TcpConnector), ClientConfig::default(), Arc::new(CapturingObserver))
        .await
        .expect("connect");
    let watcher = Arc::new(CapturingWatcher::default());
    conn.login("anyone", "whatever", Some(watcher.clone())).unwrap();
    conn.create_account("new-user", "pw", "new-user@example.com").unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let seen = watcher.seen.lock().unwrap();
    assert!(seen.iter().any(|(_, authenticated, reason)| !authenticated && reason.is_some()));
}
