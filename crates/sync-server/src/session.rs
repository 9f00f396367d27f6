//! Per-connection session actor (C5, spec §4.5): one per accepted
//! transport connection, owning a [`FramedConnection`], the authenticated
//! user (if any), and this connection's live subscriptions. Subscribe,
//! write and fanout handling all happen on this one task so that message
//! processing for a connection stays strictly in order (spec §5).

use crate::auth::{AuthProvider, Credentials};
use crate::fanout::{FanoutMessage, FanoutRegistry};
use crate::store::InMemoryStore;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_core::framed::{ConnectionEvent, FramedConnection, InboundMessage};
use sync_core::message::{DefItem, MarshalledElement, Message};
use sync_core::paid::PaidLookup;
use sync_core::xdr::DefEntry;
use sync_core::{BackingStore, Envelope, ServerPaidRegistry, Value, XdrCodec};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, process-wide server state every session reads from: the
/// registry (with its backing store), the fanout lists, and the
/// authentication plug-in (spec §4.5 "per process: one Registry, one
/// Listener, one BackingStore interface").
pub struct ServerState {
    pub registry: Arc<ServerPaidRegistry>,
    pub store: Arc<InMemoryStore>,
    pub fanout: Arc<FanoutRegistry>,
    pub auth: Arc<dyn AuthProvider>,
    /// When set, every connection must open with a successful `login`
    /// before any other message is processed (spec §7 "authentication
    /// failure -> reject handshake, client sees connect failure, no
    /// reconnect loop"). When unset, `login` stays an optional in-band
    /// message handled inside the normal dispatch loop.
    pub require_handshake_auth: bool,
}

impl ServerState {
    /// No handshake gate: `login` is optional and in-band.
    pub fn new(store: Arc<InMemoryStore>, auth: Arc<dyn AuthProvider>) -> Arc<Self> {
        Self::with_handshake_auth(store, auth, false)
    }

    pub fn with_handshake_auth(store: Arc<InMemoryStore>, auth: Arc<dyn AuthProvider>, require_handshake_auth: bool) -> Arc<Self> {
        let registry = Arc::new(ServerPaidRegistry::new(store.clone()));
        let (templates, indices) = store.preload_snapshot();
        registry.preload(templates, indices);
        Arc::new(Self { registry, store, fanout: Arc::new(FanoutRegistry::new()), auth, require_handshake_auth })
    }
}

/// Drives one accepted connection to completion. Spawned by the listener;
/// returns once the framed connection reports `Closed`.
pub async fn run_session<S>(stream: S, framed_config: sync_core::framed::FramedConnectionConfig, state: Arc<ServerState>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
    let (framed, mut events) = FramedConnection::spawn(stream, framed_config);
    let (fanout_tx, mut fanout_rx) = mpsc::unbounded_channel::<FanoutMessage>();

    let lookup: Arc<dyn PaidLookup> = state.registry.clone();
    let mut codec = XdrCodec::new(lookup);
    let mut subscribed: HashSet<u64> = HashSet::new();
    let mut username: Option<String> = None;

    if state.require_handshake_auth {
        match await_handshake(&framed, &mut events, &state, session_id).await {
            HandshakeOutcome::Authenticated(resolved) => username = Some(resolved),
            HandshakeOutcome::Rejected | HandshakeOutcome::Disconnected => return,
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ConnectionEvent::Message(inbound)) => {
                        handle_inbound(&framed, &mut codec, &state, session_id, &fanout_tx, &mut subscribed, &mut username, inbound).await;
                    }
                    Some(ConnectionEvent::Open) => debug!(session_id, "session opened"),
                    Some(ConnectionEvent::Progress { .. }) => {}
                    Some(ConnectionEvent::Error(e)) => warn!(session_id, error = %e, "session connection error"),
                    Some(ConnectionEvent::Closed(reason)) => {
                        info!(session_id, reason, "session closed");
                        break;
                    }
                    None => break,
                }
            }
            msg = fanout_rx.recv() => {
                if let Some(msg) = msg {
                    send_fanout(&framed, &mut codec, msg);
                }
            }
        }
    }

    for resource_id in subscribed {
        state.fanout.unsubscribe(resource_id, session_id);
    }
}

enum HandshakeOutcome {
    Authenticated(String),
    Rejected,
    Disconnected,
}

/// Gates a freshly-accepted connection on a `login` message before it ever
/// reaches the normal dispatch loop. Anything other than a successful
/// `login` as the very first message is a rejection: spec §7's
/// "authentication failure -> reject handshake, client sees connect
/// failure, no reconnect loop" row, translated onto this crate's framed
/// transport (there is no separate HTTP/WebSocket layer to gate ahead of
/// it).
async fn await_handshake(
    framed: &Arc<FramedConnection>,
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    state: &Arc<ServerState>,
    session_id: u64,
) -> HandshakeOutcome {
    loop {
        match events.recv().await {
            Some(ConnectionEvent::Message(inbound)) => {
                let envelope = match Envelope::from_json(&inbound.body) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(session_id, error = %e, "malformed handshake message, rejecting");
                        reject_handshake(framed, "malformed handshake message").await;
                        return HandshakeOutcome::Rejected;
                    }
                };
                let Message::Login { username: user, password, login_seq_nr } = envelope.message else {
                    warn!(session_id, "first message was not login, rejecting handshake");
                    reject_handshake(framed, "expected login as the first message").await;
                    return HandshakeOutcome::Rejected;
                };
                match state.auth.authenticate(Credentials::HttpBasic { username: user.clone(), password }).await {
                    Ok(resolved) => {
                        let reply = Envelope::new(Message::LoginStatus {
                            username: user,
                            authenticated: true,
                            reason: None,
                            login_seq_nr,
                        });
                        let _ = framed.send_message(0, &reply.to_json());
                        let _ = framed.flush();
                        info!(session_id, user = %resolved, "handshake authenticated");
                        return HandshakeOutcome::Authenticated(resolved);
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        let status = Envelope::new(Message::LoginStatus {
                            username: user,
                            authenticated: false,
                            reason: Some(reason.clone()),
                            login_seq_nr,
                        });
                        let _ = framed.send_message(0, &status.to_json());
                        warn!(session_id, reason, "handshake authentication failed, rejecting");
                        reject_handshake(framed, &reason).await;
                        return HandshakeOutcome::Rejected;
                    }
                }
            }
            Some(ConnectionEvent::Open) | Some(ConnectionEvent::Progress { .. }) => continue,
            Some(ConnectionEvent::Error(e)) => {
                warn!(session_id, error = %e, "connection error during handshake");
                continue;
            }
            Some(ConnectionEvent::Closed(reason)) => {
                debug!(session_id, reason, "connection closed before handshake completed");
                return HandshakeOutcome::Disconnected;
            }
            None => return HandshakeOutcome::Disconnected,
        }
    }
}

/// Sends `terminate` and tears the connection down from this side so the
/// peer is not left waiting on a socket nobody is servicing (spec §4.4's
/// `terminated` state is what suppresses the client's reconnect loop).
async fn reject_handshake(framed: &Arc<FramedConnection>, reason: &str) {
    let terminate = Envelope::new(Message::Terminate { reason: format!("authentication failed: {reason}") });
    let _ = framed.send_message(0, &terminate.to_json());
    framed.close().await;
}

async fn handle_inbound(
    framed: &Arc<FramedConnection>,
    codec: &mut XdrCodec,
    state: &Arc<ServerState>,
    session_id: u64,
    fanout_tx: &mpsc::UnboundedSender<FanoutMessage>,
    subscribed: &mut HashSet<u64>,
    username: &mut Option<String>,
    inbound: InboundMessage,
) {
    let envelope = match Envelope::from_json(&inbound.body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "malformed inbound message, ignoring");
            return;
        }
    };

    match envelope.message {
        Message::Subscribe { resource_id, revision, .. } => {
            state.fanout.subscribe(resource_id, session_id, fanout_tx.clone());
            subscribed.insert(resource_id);
            let from_revision = revision.unwrap_or(0);
            stream_backlog(framed, codec, state, resource_id, from_revision).await;
        }
        Message::Unsubscribe { resource_id } | Message::ReleaseResource { resource_id } => {
            state.fanout.unsubscribe(resource_id, session_id);
            subscribed.remove(&resource_id);
        }
        Message::Write { resource_id, list, ack_id } => {
            handle_write(framed, codec, state, session_id, inbound.sequence_nr, resource_id, list, ack_id).await;
        }
        Message::Login { username: user, password, login_seq_nr } => {
            let result = state.auth.authenticate(Credentials::HttpBasic { username: user.clone(), password }).await;
            let (authenticated, reason) = match result {
                Ok(resolved) => {
                    *username = Some(resolved);
                    (true, None)
                }
                Err(e) => (false, Some(e.to_string())),
            };
            let reply = Envelope::new(Message::LoginStatus { username: user, authenticated, reason, login_seq_nr });
            let _ = framed.send_message(0, &reply.to_json());
        }
        Message::Logout {} => {
            *username = None;
        }
        Message::CreateAccount { username: user, login_seq_nr, .. } => {
            let reply = Envelope::new(Message::LoginStatus {
                username: user,
                authenticated: false,
                reason: Some("account creation is not supported by this backing store".to_string()),
                login_seq_nr,
            });
            let _ = framed.send_message(0, &reply.to_json());
        }
        other => {
            debug!(?other, session_id, "unhandled message kind on server dispatch");
        }
    }
}

async fn stream_backlog(
    framed: &Arc<FramedConnection>,
    codec: &mut XdrCodec,
    state: &Arc<ServerState>,
    resource_id: u64,
    from_revision: u64,
) {
    let elements = state.store.range(resource_id, from_revision).await;
    let mut by_revision: BTreeMap<u64, Vec<(String, Value)>> = BTreeMap::new();
    for element in elements {
        by_revision.entry(element.revision).or_default().push((element.identifier, element.value));
    }
    if by_revision.is_empty() {
        let empty = Envelope::new(Message::ResourceUpdate { resource_id, revision: from_revision, update: BTreeMap::new() });
        let _ = framed.send_message(resource_id, &empty.to_json());
        return;
    }
    for (revision, elements) in by_revision {
        send_resource_update(framed, codec, resource_id, revision, elements);
    }
}

async fn handle_write(
    framed: &Arc<FramedConnection>,
    codec: &mut XdrCodec,
    state: &Arc<ServerState>,
    session_id: u64,
    sequence_nr: u64,
    resource_id: u64,
    list: Vec<MarshalledElement>,
    ack_id: u64,
) {
    let mut elements = Vec::with_capacity(list.len());
    for element in list {
        match codec.unmarshal(&element.value) {
            Ok(value) => elements.push((element.ident, value)),
            Err(e) => {
                warn!(session_id, error = %e, "failed to unmarshal write element");
                let reply = Envelope::reply_to(Message::Error { description: e.to_string() }, sequence_nr);
                let _ = framed.send_message(resource_id, &reply.to_json());
                return;
            }
        }
    }

    match state.store.append(resource_id, elements.clone()).await {
        Ok(revision) => {
            let reply = Envelope::reply_to(Message::WriteAck { ack_id, revision, info: None }, sequence_nr);
            let _ = framed.send_message(resource_id, &reply.to_json());
            state.fanout.publish(FanoutMessage { resource_id, revision, elements });
        }
        Err(e) => {
            warn!(session_id, error = %e, "backing store append failed, batch treated as no-op");
            let reply = Envelope::reply_to(Message::Error { description: e.to_string() }, sequence_nr);
            let _ = framed.send_message(resource_id, &reply.to_json());
        }
    }
}

fn send_resource_update(framed: &Arc<FramedConnection>, codec: &mut XdrCodec, resource_id: u64, revision: u64, elements: Vec<(String, Value)>) {
    let values: Vec<&Value> = elements.iter().map(|(_, v)| v).collect();
    let (defs, jsons) = codec.marshal_batch(&values);
    if !defs.is_empty() {
        let items: Vec<DefItem> = defs.into_iter().map(DefItem::from).collect();
        let define = Envelope::new(Message::Define { resource_id, list: items });
        let _ = framed.send_message(resource_id, &define.to_json());
    }
    let update: BTreeMap<String, MarshalledElement> = elements
        .into_iter()
        .zip(jsons)
        .map(|((ident, _), value)| (ident.clone(), MarshalledElement { ident, value }))
        .collect();
    let envelope = Envelope::new(Message::ResourceUpdate { resource_id, revision, update });
    let _ = framed.send_message(resource_id, &envelope.to_json());
}

fn send_fanout(framed: &Arc<FramedConnection>, codec: &mut XdrCodec, msg: FanoutMessage) {
    send_resource_update(framed, codec, msg.resource_id, msg.revision, msg.elements);
}
