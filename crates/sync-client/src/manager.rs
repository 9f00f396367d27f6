//! Top-level client facade: one [`SyncClient`] multiplexes connections to
//! however many `hostSpec`s the application talks to, lazily connecting
//! and reusing a [`ClientConnection`] per host (spec §3 "Client").

use crate::connection::ClientConnection;
use crate::observer::{ConnectionObserver, NullObserver};
use crate::transport::Connector;
use crate::ClientConfig;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use sync_core::{Result, Value};

/// Owns zero or more [`ClientConnection`]s, keyed by `hostSpec`. Cheap to
/// clone (internally an `Arc`-free facade over a mutex-guarded map — callers
/// typically keep one `SyncClient` per application and share it).
pub struct SyncClient {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    observer: Arc<dyn ConnectionObserver>,
    connections: Mutex<HashMap<String, Arc<ClientConnection>>>,
}

impl SyncClient {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        Self { connector, config, observer: Arc::new(NullObserver), connections: Mutex::new(HashMap::new()) }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the connection for `host`, establishing it on first use.
    pub async fn connection(&self, host: &str) -> Result<Arc<ClientConnection>> {
        if let Some(existing) = self.connections.lock().get(host).cloned() {
            return Ok(existing);
        }
        let conn = ClientConnection::connect(host, self.connector.clone(), self.config.clone(), self.observer.clone()).await?;
        self.connections.lock().insert(host.to_string(), conn.clone());
        Ok(conn)
    }

    pub async fn subscribe(
        &self,
        host: &str,
        consumer: Arc<dyn crate::observer::ResourceConsumer>,
        resource_spec: Json,
        resume_revision: u64,
    ) -> Result<u64> {
        let conn = self.connection(host).await?;
        conn.subscribe(consumer, resource_spec, resume_revision, None, host)
    }

    pub async fn unsubscribe(&self, host: &str, resource_id: u64) -> Result<()> {
        self.connection(host).await?.unsubscribe(resource_id)
    }

    pub async fn write(&self, host: &str, resource_id: u64, ident: impl Into<String>, value: Value) -> Result<()> {
        self.connection(host).await?.write(resource_id, ident, value);
        Ok(())
    }

    pub async fn flush(&self, host: &str, resource_id: u64) -> Result<()> {
        self.connection(host).await?.flush(resource_id).await
    }

    pub async fn flush_all(&self, host: &str) -> Result<()> {
        self.connection(host).await?.flush_all().await
    }

    pub async fn login(&self, host: &str, username: impl Into<String>, password: impl Into<String>) -> Result<u64> {
        self.connection(host).await?.login(username, password, None)
    }

    pub async fn logout(&self, host: &str) -> Result<()> {
        self.connection(host).await?.logout()
    }
}
