//! The client-side connection actor (part of C4): one
//! [`ClientConnection`] per `hostSpec`, multiplexing every subscription
//! and pending write over a single [`FramedConnection`]. Owns
//! reconnection, resubscription and write-resubmission (spec §4.4).

use crate::observer::{ConnectionObserver, ConnectionStateCode, ResourceConsumer, StatusWatcher};
use crate::pending::{PendingWrites, UpdateDisposition};
use crate::subscription::Subscription;
use crate::transport::Connector;
use crate::ClientConfig;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_core::framed::{ConnectionEvent, FramedConnection, InboundMessage};
use sync_core::message::{DefItem, MarshalledElement, Message};
use sync_core::xdr::DefEntry;
use sync_core::{Envelope, PaidRegistry, Result, SyncError, Value, XdrCodec};
use tracing::{debug, error, info, warn};

type IdentFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

struct SubscriptionEntry {
    subscription: Subscription,
    consumer: Arc<dyn ResourceConsumer>,
    ident_fn: Option<IdentFn>,
    #[allow(dead_code)]
    consumer_tag: String,
}

impl SubscriptionEntry {
    fn deliver(&self, ident: &str, value: &Value) {
        let key = match &self.ident_fn {
            Some(f) => f(ident),
            None => ident.to_string(),
        };
        self.consumer.on_update(&key, value);
    }
}

struct Inner {
    framed: Option<Arc<FramedConnection>>,
    codec: XdrCodec,
    subscriptions: HashMap<u64, SubscriptionEntry>,
    pending: PendingWrites,
    next_resource_id: u64,
    status_watcher: Option<Arc<dyn StatusWatcher>>,
    /// Set once a `terminate`/`reloadApplication` message is received:
    /// suppresses reconnect on the ensuing `Closed` event (spec §4.4).
    terminated: bool,
}

/// One logical connection to a `hostSpec`. Cheap to clone the `Arc`;
/// internal state is behind a `parking_lot::Mutex`, matching the spec's
/// single-threaded cooperative model (short, synchronous critical
/// sections; nothing is held across an `.await`).
pub struct ClientConnection {
    host: String,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    observer: Arc<dyn ConnectionObserver>,
    inner: Mutex<Inner>,
    reconnect_ticker: Mutex<crate::ticker::Ticker>,
    login_seq: AtomicU64,
}

impl ClientConnection {
    pub async fn connect(
        host: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        let host = host.into();
        let stream = connector.connect(&host).await.map_err(SyncError::from)?;
        let (framed, events) = FramedConnection::spawn(stream, config.framed.clone());
        let registry = Arc::new(PaidRegistry::new());
        let this = Arc::new(Self {
            host,
            config,
            connector,
            observer,
            inner: Mutex::new(Inner {
                framed: Some(framed),
                codec: XdrCodec::new(registry),
                subscriptions: HashMap::new(),
                pending: PendingWrites::new(),
                next_resource_id: 1,
                status_watcher: None,
                terminated: false,
            }),
            reconnect_ticker: Mutex::new(crate::ticker::Ticker::new()),
            login_seq: AtomicU64::new(1),
        });
        tokio::spawn(dispatch_loop(this.clone(), events));
        Ok(this)
    }

    pub fn subscribe(
        &self,
        consumer: Arc<dyn ResourceConsumer>,
        resource_spec: Json,
        resume_revision: u64,
        ident_fn: Option<IdentFn>,
        consumer_tag: impl Into<String>,
    ) -> Result<u64> {
        let (resource_id, framed, json) = {
            let mut inner = self.inner.lock();
            let resource_id = inner.next_resource_id;
            inner.next_resource_id += 1;
            inner.subscriptions.insert(
                resource_id,
                SubscriptionEntry {
                    subscription: Subscription::new(resource_id, resource_spec.clone(), resume_revision),
                    consumer,
                    ident_fn,
                    consumer_tag: consumer_tag.into(),
                },
            );
            let json = Envelope::new(Message::Subscribe {
                resource_id,
                resource_spec,
                revision: Some(resume_revision),
            })
            .to_json();
            let framed = inner.framed.clone();
            (resource_id, framed, json)
        };
        if let Some(framed) = framed {
            framed.send_message(resource_id, &json)?;
        }
        Ok(resource_id)
    }

    pub fn unsubscribe(&self, resource_id: u64) -> Result<()> {
        let framed = {
            let mut inner = self.inner.lock();
            inner.subscriptions.remove(&resource_id);
            inner.framed.clone()
        };
        if let Some(framed) = framed {
            framed.send_message(resource_id, &Envelope::new(Message::Unsubscribe { resource_id }).to_json())?;
        }
        Ok(())
    }

    pub fn release_resource(&self, resource_id: u64) -> Result<()> {
        let framed = self.inner.lock().framed.clone();
        if let Some(framed) = framed {
            framed.send_message(resource_id, &Envelope::new(Message::ReleaseResource { resource_id }).to_json())?;
        }
        Ok(())
    }

    /// Queues `value` for `ident` onto `resource_id`'s batch; does not
    /// send anything until [`ClientConnection::flush`].
    pub fn write(&self, resource_id: u64, ident: impl Into<String>, value: Value) {
        self.inner.lock().pending.queue(resource_id, ident, value);
    }

    /// Coalesces `resource_id`'s pending batch into one `write` message
    /// with a fresh `ackId`.
    pub async fn flush(self: &Arc<Self>, resource_id: u64) -> Result<()> {
        let (framed, ack_id, idents, define_json, write_json) = {
            let mut inner = self.inner.lock();
            let Some((ack_id, elements)) = inner.pending.flush(resource_id) else {
                return Ok(());
            };
            let Some(framed) = inner.framed.clone() else {
                return Err(SyncError::Closed("not connected".into()));
            };
            let (list, idents, define_json) = marshal_batch(&mut inner.codec, resource_id, elements);
            let write_json = Envelope::new(Message::Write { resource_id, list, ack_id }).to_json();
            (framed, ack_id, idents, define_json, write_json)
        };
        send_batch(self, &framed, resource_id, ack_id, idents, define_json, write_json).await
    }

    /// Flushes every resource with a staged batch.
    pub async fn flush_all(self: &Arc<Self>) -> Result<()> {
        let resources = self.inner.lock().pending.staged_resources();
        for resource_id in resources {
            self.flush(resource_id).await?;
        }
        Ok(())
    }

    pub fn login(&self, username: impl Into<String>, password: impl Into<String>, watcher: Option<Arc<dyn StatusWatcher>>) -> Result<u64> {
        let login_seq_nr = self.login_seq.fetch_add(1, Ordering::SeqCst);
        let framed = {
            let mut inner = self.inner.lock();
            if watcher.is_some() {
                inner.status_watcher = watcher;
            }
            inner.framed.clone()
        };
        if let Some(framed) = framed {
            framed.send_message(
                0,
                &Envelope::new(Message::Login { username: username.into(), password: password.into(), login_seq_nr }).to_json(),
            )?;
        }
        Ok(login_seq_nr)
    }

    pub fn logout(&self) -> Result<()> {
        let framed = self.inner.lock().framed.clone();
        if let Some(framed) = framed {
            framed.send_message(0, &Envelope::new(Message::Logout {}).to_json())?;
        }
        Ok(())
    }

    pub fn create_account(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<u64> {
        let login_seq_nr = self.login_seq.fetch_add(1, Ordering::SeqCst);
        let framed = self.inner.lock().framed.clone();
        if let Some(framed) = framed {
            framed.send_message(
                0,
                &Envelope::new(Message::CreateAccount {
                    username: username.into(),
                    password: password.into(),
                    email: email.into(),
                    login_seq_nr,
                })
                .to_json(),
            )?;
        }
        Ok(login_seq_nr)
    }

    fn on_write_reply(self: &Arc<Self>, resource_id: u64, expected_ack_id: u64, idents: Vec<String>, reply: InboundMessage) {
        let envelope = match Envelope::from_json(&reply.body) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed write-ack envelope");
                return;
            }
        };
        let Message::WriteAck { ack_id, revision, .. } = envelope.message else {
            warn!("expected writeAck reply to a write message, got something else");
            return;
        };
        if ack_id != expected_ack_id {
            warn!(ack_id, expected_ack_id, "writeAck carries unexpected ackId");
        }
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.subscriptions.get_mut(&resource_id) {
            entry.subscription.on_write_ack(revision, &idents);
        }
        let surfaced = inner.pending.handle_ack(resource_id, ack_id, revision, &idents);
        if let Some(entry) = inner.subscriptions.get(&resource_id) {
            for (ident, value) in surfaced {
                entry.deliver(&ident, &value);
            }
        }
    }

    fn handle_resource_update(&self, resource_id: u64, revision: u64, update: HashMap<String, Value>) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.subscriptions.get_mut(&resource_id) else {
            debug!(resource_id, "resourceUpdate for unknown/unsubscribed resource, dropping");
            return;
        };
        if !entry.subscription.on_update(revision) {
            return;
        }
        let mut to_deliver = Vec::new();
        for (ident, value) in update {
            if entry.subscription.is_stale(&ident, revision) {
                continue;
            }
            match inner.pending.handle_update(resource_id, &ident, revision, &value) {
                UpdateDisposition::Apply => to_deliver.push((ident, value)),
                UpdateDisposition::Deferred => {}
            }
        }
        if let Some(entry) = inner.subscriptions.get(&resource_id) {
            for (ident, value) in to_deliver {
                entry.deliver(&ident, &value);
            }
        }
    }

    fn handle_login_status(&self, username: String, authenticated: bool, reason: Option<String>, login_seq_nr: u64) {
        let watcher = self.inner.lock().status_watcher.clone();
        if let Some(watcher) = watcher {
            watcher.on_login_status(&username, authenticated, reason.as_deref(), login_seq_nr);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let this = self.clone();
        let delay = self.config.reconnect_delay;
        self.reconnect_ticker.lock().schedule(delay, async move {
            this.reconnect().await;
        });
    }

    async fn reconnect(self: &Arc<Self>) {
        loop {
            match self.connector.connect(&self.host).await {
                Ok(stream) => {
                    let (framed, events) = FramedConnection::spawn(stream, self.config.framed.clone());
                    let resubmit_batches = {
                        let mut inner = self.inner.lock();
                        inner.framed = Some(framed.clone());
                        inner.codec.reset();
                        inner.terminated = false;
                        let subs: Vec<(u64, Json, u64)> = inner
                            .subscriptions
                            .iter()
                            .map(|(id, entry)| (*id, entry.subscription.spec.clone(), entry.subscription.revision))
                            .collect();
                        for (resource_id, spec, revision) in &subs {
                            let json = Envelope::new(Message::Subscribe {
                                resource_id: *resource_id,
                                resource_spec: spec.clone(),
                                revision: Some(*revision),
                            })
                            .to_json();
                            let _ = framed.send_message(*resource_id, &json);
                        }
                        inner.pending.resubmit_all()
                    };
                    for (resource_id, ack_id, elements) in resubmit_batches {
                        let (framed, idents, define_json, write_json) = {
                            let mut inner = self.inner.lock();
                            let (list, idents, define_json) = marshal_batch(&mut inner.codec, resource_id, elements);
                            let write_json = Envelope::new(Message::Write { resource_id, list, ack_id }).to_json();
                            (inner.framed.clone().expect("just set"), idents, define_json, write_json)
                        };
                        if let Err(e) = send_batch(self, &framed, resource_id, ack_id, idents, define_json, write_json).await {
                            error!(error = %e, "failed to resubmit pending write after reconnect");
                        }
                    }
                    tokio::spawn(dispatch_loop(self.clone(), events));
                    self.observer.on_state(ConnectionStateCode::Open, "");
                    info!(host = %self.host, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(host = %self.host, error = %e, "reconnect attempt failed, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }
}

fn marshal_batch(codec: &mut XdrCodec, resource_id: u64, elements: Vec<(String, Value)>) -> (Vec<MarshalledElement>, Vec<String>, Option<Json>) {
    let values: Vec<&Value> = elements.iter().map(|(_, v)| v).collect();
    let (defs, jsons) = codec.marshal_batch(&values);
    let idents: Vec<String> = elements.iter().map(|(ident, _)| ident.clone()).collect();
    let list: Vec<MarshalledElement> =
        elements.into_iter().zip(jsons).map(|((ident, _), value)| MarshalledElement { ident, value }).collect();
    let define_json = if defs.is_empty() {
        None
    } else {
        let items: Vec<DefItem> = defs.into_iter().map(DefItem::from).collect();
        Some(Envelope::new(Message::Define { resource_id, list: items }).to_json())
    };
    (list, idents, define_json)
}

async fn send_batch(
    this: &Arc<ClientConnection>,
    framed: &Arc<FramedConnection>,
    resource_id: u64,
    ack_id: u64,
    idents: Vec<String>,
    define_json: Option<Json>,
    write_json: Json,
) -> Result<()> {
    if let Some(def_json) = define_json {
        framed.send_message(resource_id, &def_json)?;
    }
    let (_, rx) = framed.send_message_with_reply(resource_id, &write_json)?;
    let this = this.clone();
    tokio::spawn(async move {
        if let Ok(Ok(reply)) = rx.await {
            this.on_write_reply(resource_id, ack_id, idents, reply);
        }
    });
    Ok(())
}

async fn dispatch_loop(conn: Arc<ClientConnection>, mut events: tokio::sync::mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Open => conn.observer.on_state(ConnectionStateCode::Open, ""),
            ConnectionEvent::Progress { .. } => {}
            ConnectionEvent::Error(e) => warn!(error = %e, "connection error"),
            ConnectionEvent::Message(inbound) => handle_inbound(&conn, inbound),
            ConnectionEvent::Closed(reason) => {
                conn.inner.lock().framed = None;
                let terminated = conn.inner.lock().terminated;
                if !terminated {
                    conn.observer.on_state(ConnectionStateCode::ClosedWillReconnect, &reason);
                    conn.schedule_reconnect();
                }
                return;
            }
        }
    }
}

fn handle_inbound(conn: &Arc<ClientConnection>, inbound: InboundMessage) {
    let envelope = match Envelope::from_json(&inbound.body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "malformed inbound message");
            return;
        }
    };
    match envelope.message {
        Message::ResourceUpdate { resource_id, revision, update } => {
            let mut decoded = HashMap::with_capacity(update.len());
            let codec_ready = {
                let mut inner = conn.inner.lock();
                for (ident, element) in &update {
                    match inner.codec.unmarshal(&element.value) {
                        Ok(value) => {
                            decoded.insert(ident.clone(), value);
                        }
                        Err(e) => warn!(error = %e, ident, "failed to unmarshal resourceUpdate element"),
                    }
                }
                true
            };
            if codec_ready {
                conn.handle_resource_update(resource_id, revision, decoded);
            }
        }
        Message::Define { list, .. } => {
            let entries: Vec<DefEntry> = list.into_iter().filter_map(|item| item.try_into().ok()).collect();
            if let Err(e) = conn.inner.lock().codec.apply_define(&entries) {
                warn!(error = %e, "failed to apply inbound define");
            }
        }
        Message::LoginStatus { username, authenticated, reason, login_seq_nr } => {
            conn.handle_login_status(username, authenticated, reason, login_seq_nr);
        }
        Message::Terminate { reason } => {
            conn.inner.lock().terminated = true;
            conn.observer.on_state(ConnectionStateCode::Terminated, &reason);
        }
        Message::ReloadApplication { reason } => {
            conn.inner.lock().terminated = true;
            conn.observer.on_state(ConnectionStateCode::ReloadApplication, &reason);
        }
        Message::Error { description } => {
            warn!(description, "server reported error");
        }
        other => {
            debug!(?other, "unhandled message kind on client dispatch loop");
        }
    }
}
