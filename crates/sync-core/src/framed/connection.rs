//! The framed connection (C1): logical messages over a duplex byte-pipe
//! with segmentation, reassembly, pooled flushing, per-buffer
//! acknowledgement and reply routing. See spec §4.1.
//!
//! Chunk sizing note: a header's `totalLength` field carries only the
//! *current buffer's* chunk length (see [`super::header::Header`]); the
//! overall message length is accumulated by the reader as chunks arrive.
//! This means both ends must agree on `max_buffer` out of band (the
//! connection config) — there is no separate on-wire chunk-length field.
//! See `DESIGN.md` for why this reading of the header layout was chosen.

use super::header::{AckBody, Header, Segment, ACK_BODY_LEN, CURRENT_VERSION, HEADER_LEN, SERVICE_SEQUENCE_NR};
use crate::error::{Result, SyncError};
use crate::message::{Envelope, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

#[derive(Clone, Debug)]
pub struct FramedConnectionConfig {
    /// Flush once the outbound queue holds this many messages.
    pub pool_size: usize,
    /// Flush once this long has elapsed since the oldest queued message.
    pub pool_delay: Duration,
    /// Body bytes carried per physical buffer before chunking kicks in.
    pub max_buffer: usize,
    /// `None` disables reply-timeout teardown.
    pub reply_timeout: Option<Duration>,
    /// Test hook: an artificial per-flush delay simulating bandwidth.
    pub artificial_delay: Option<Duration>,
}

impl Default for FramedConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 32,
            pool_delay: Duration::from_millis(20),
            max_buffer: 16_000,
            reply_timeout: Some(Duration::from_secs(30)),
            artificial_delay: None,
        }
    }
}

/// A fully reassembled inbound application message.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub resource_id: u64,
    pub sequence_nr: u64,
    pub body: serde_json::Value,
}

impl InboundMessage {
    fn in_reply_to(&self) -> Option<u64> {
        self.body.get("inReplyTo").and_then(serde_json::Value::as_u64).filter(|nr| *nr != 0)
    }
}

/// Lifecycle and progress events surfaced to the owner of a connection —
/// `errorHandler`/`closeHandler`/`openHandler` and the inbound progress
/// callback from spec §4.1.
#[derive(Debug)]
pub enum ConnectionEvent {
    Open,
    Message(InboundMessage),
    Progress { resource_id: u64, sequence_nr: u64, received_so_far: u64, total_length: u64 },
    Error(SyncError),
    Closed(String),
}

/// Resolution of a `send_message_with_reply` call: the delivered reply
/// message, or a reason the wait ended without one (timeout, teardown).
pub type ReplyResult = std::result::Result<InboundMessage, String>;

struct Outgoing {
    resource_id: u64,
    sequence_nr: u64,
    body: Vec<u8>,
    queued_at: Instant,
}

enum Command {
    Send { resource_id: u64, sequence_nr: u64, body: Vec<u8>, reply_to: Option<oneshot::Sender<ReplyResult>> },
    Flush,
    /// Acks bypass pooling — sent promptly after each buffer (spec §4.1).
    Ack(AckBody),
    /// Flushes, shuts down the write half, and stops the writer task. Goes
    /// through the same ordered channel as `Send`/`Flush` so anything
    /// queued ahead of it (e.g. a `terminate` reply) is still written out
    /// before the socket closes.
    Close(oneshot::Sender<()>),
}

struct Reassembly {
    resource_id: u64,
    sequence_nr: u64,
    buffer: Vec<u8>,
}

struct PendingReplies {
    handlers: HashMap<u64, oneshot::Sender<ReplyResult>>,
    deadlines: HashMap<u64, Instant>,
}

impl PendingReplies {
    fn new() -> Self {
        Self { handlers: HashMap::new(), deadlines: HashMap::new() }
    }

    fn teardown(&mut self, reason: &str) {
        for (_, handler) in self.handlers.drain() {
            let _ = handler.send(Err(reason.to_string()));
        }
        self.deadlines.clear();
    }
}

/// Level-triggered shutdown signal for the reader task: `trigger` is safe to
/// call before the reader ever reaches its `triggered().await` point (unlike
/// a bare `Notify`, whose `notify_waiters` only reaches waiters already
/// parked). The writer task has its own ordered `commands` channel to carry
/// a close instruction (`Command::Close`), so it does not need this.
struct ShutdownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self { flag: AtomicBool::new(false), notify: Notify::new() }
    }

    fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn triggered(&self) {
        let notified = self.notify.notified();
        if self.flag.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// A framed, resumable stream connection. Owns a background reader task
/// and a background writer/flush task; communicates with callers through
/// a command channel (outbound) and an event channel (inbound).
pub struct FramedConnection {
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<AsyncMutex<PendingReplies>>,
    next_sequence_nr: Arc<AtomicU64>,
    config: FramedConnectionConfig,
    shutdown: Arc<ShutdownSignal>,
}

impl FramedConnection {
    /// Splits `stream` and spawns the reader/writer tasks. Returns the
    /// handle plus the event receiver the caller should drain.
    pub fn spawn<S>(stream: S, config: FramedConnectionConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pending = Arc::new(AsyncMutex::new(PendingReplies::new()));
        let next_sequence_nr = Arc::new(AtomicU64::new(1));
        let shutdown = Arc::new(ShutdownSignal::new());

        tokio::spawn(writer_task(write_half, command_rx, config.clone(), pending.clone(), event_tx.clone()));
        tokio::spawn(reader_task(
            read_half,
            event_tx.clone(),
            pending.clone(),
            command_tx.clone(),
            next_sequence_nr.clone(),
            shutdown.clone(),
        ));
        if let Some(timeout) = config.reply_timeout {
            tokio::spawn(reply_timeout_task(pending.clone(), timeout, event_tx.clone()));
        }
        let _ = event_tx.send(ConnectionEvent::Open);

        let connection = Arc::new(Self { commands: command_tx, pending, next_sequence_nr, config, shutdown });
        (connection, event_rx)
    }

    /// Assigns the next sequence number, enqueues `body` for send, and
    /// schedules a flush. Does not block.
    pub fn send_message(&self, resource_id: u64, body: &serde_json::Value) -> Result<u64> {
        let sequence_nr = self.next_sequence_nr.fetch_add(1, Ordering::SeqCst);
        let encoded = serde_json::to_vec(body).map_err(|e| SyncError::decode(e.to_string()))?;
        self.commands
            .send(Command::Send { resource_id, sequence_nr, body: encoded, reply_to: None })
            .map_err(|_| SyncError::Closed("connection writer task gone".into()))?;
        Ok(sequence_nr)
    }

    /// Like [`FramedConnection::send_message`] but resolves the returned
    /// receiver once a delivered message carries a matching `inReplyTo`,
    /// or on reply-timeout/connection teardown.
    pub fn send_message_with_reply(
        &self,
        resource_id: u64,
        body: &serde_json::Value,
    ) -> Result<(u64, oneshot::Receiver<ReplyResult>)> {
        let sequence_nr = self.next_sequence_nr.fetch_add(1, Ordering::SeqCst);
        let encoded = serde_json::to_vec(body).map_err(|e| SyncError::decode(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { resource_id, sequence_nr, body: encoded, reply_to: Some(tx) })
            .map_err(|_| SyncError::Closed("connection writer task gone".into()))?;
        Ok((sequence_nr, rx))
    }

    pub fn flush(&self) -> Result<()> {
        self.commands.send(Command::Flush).map_err(|_| SyncError::Closed("connection writer task gone".into()))
    }

    pub fn config(&self) -> &FramedConnectionConfig {
        &self.config
    }

    /// Flushes anything already queued, then tears the connection down from
    /// this side: the writer shuts down the socket's write half and the
    /// reader stops waiting for further frames. Used for server-initiated
    /// rejection (e.g. a failed handshake), where the peer must not be left
    /// waiting on a socket nobody is servicing anymore.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        self.pending.lock().await.teardown("connection closed locally");
        self.shutdown.trigger();
    }
}

async fn writer_task<W>(
    mut write_half: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    config: FramedConnectionConfig,
    pending: Arc<AsyncMutex<PendingReplies>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    W: AsyncWrite + Unpin,
{
    let mut queue: Vec<Outgoing> = Vec::new();
    let mut ticker = interval(config.pool_delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send { resource_id, sequence_nr, body, reply_to }) => {
                        if let Some(reply_to) = reply_to {
                            let mut guard = pending.lock().await;
                            guard.handlers.insert(sequence_nr, reply_to);
                            if let Some(timeout) = config.reply_timeout {
                                guard.deadlines.insert(sequence_nr, Instant::now() + timeout);
                            }
                        }
                        queue.push(Outgoing { resource_id, sequence_nr, body, queued_at: Instant::now() });
                        if queue.len() >= config.pool_size {
                            if let Err(e) = flush_queue(&mut write_half, &mut queue, &config).await {
                                let _ = events.send(ConnectionEvent::Error(e));
                                break;
                            }
                        }
                    }
                    Some(Command::Flush) => {
                        if let Err(e) = flush_queue(&mut write_half, &mut queue, &config).await {
                            let _ = events.send(ConnectionEvent::Error(e));
                            break;
                        }
                    }
                    Some(Command::Ack(ack)) => {
                        if let Err(e) = write_ack(&mut write_half, &ack).await {
                            let _ = events.send(ConnectionEvent::Error(e));
                            break;
                        }
                    }
                    Some(Command::Close(done)) => {
                        let _ = flush_queue(&mut write_half, &mut queue, &config).await;
                        let _ = write_half.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !queue.is_empty() {
                    let oldest = queue.iter().map(|m| m.queued_at).min().unwrap();
                    if oldest.elapsed() >= config.pool_delay {
                        if let Err(e) = flush_queue(&mut write_half, &mut queue, &config).await {
                            let _ = events.send(ConnectionEvent::Error(e));
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
    pending.lock().await.teardown("connection closed");
}

async fn flush_queue<W>(write_half: &mut W, queue: &mut Vec<Outgoing>, config: &FramedConnectionConfig) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if queue.is_empty() {
        return Ok(());
    }
    for message in queue.drain(..) {
        write_framed(write_half, &message, config).await?;
    }
    if let Some(delay) = config.artificial_delay {
        tokio::time::sleep(delay).await;
    }
    write_half.flush().await?;
    Ok(())
}

async fn write_framed<W>(write_half: &mut W, message: &Outgoing, config: &FramedConnectionConfig) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total = message.body.len();
    if total <= config.max_buffer {
        let header =
            Header::new(CURRENT_VERSION, Segment::Whole, message.resource_id, message.sequence_nr, total as u64);
        write_half.write_all(header.format().as_bytes()).await?;
        write_half.write_all(&message.body).await?;
        return Ok(());
    }

    let mut offset = 0;
    while offset < total {
        let remaining = total - offset;
        let chunk_len = remaining.min(config.max_buffer);
        let is_first = offset == 0;
        let is_last = offset + chunk_len == total;
        let segment = if is_first {
            Segment::First
        } else if is_last {
            Segment::Last
        } else {
            Segment::Middle
        };
        let header =
            Header::new(CURRENT_VERSION, segment, message.resource_id, message.sequence_nr, chunk_len as u64);
        write_half.write_all(header.format().as_bytes()).await?;
        write_half.write_all(&message.body[offset..offset + chunk_len]).await?;
        offset += chunk_len;
    }
    Ok(())
}

async fn write_ack<W>(write_half: &mut W, ack: &AckBody) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = ack.format().into_bytes();
    let header = Header::new(CURRENT_VERSION, Segment::Whole, 0, SERVICE_SEQUENCE_NR, body.len() as u64);
    write_half.write_all(header.format().as_bytes()).await?;
    write_half.write_all(&body).await?;
    write_half.flush().await?;
    Ok(())
}

async fn reader_task<R>(
    mut read_half: R,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    pending: Arc<AsyncMutex<PendingReplies>>,
    commands: mpsc::UnboundedSender<Command>,
    next_sequence_nr: Arc<AtomicU64>,
    shutdown: Arc<ShutdownSignal>,
) where
    R: AsyncRead + Unpin,
{
    let mut reassembly: Option<Reassembly> = None;
    let mut header_buf = [0u8; HEADER_LEN];

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                let _ = events.send(ConnectionEvent::Closed("connection closed locally".into()));
                break;
            }
            result = read_half.read_exact(&mut header_buf) => {
                if result.is_err() {
                    let _ = events.send(ConnectionEvent::Closed("peer closed connection".into()));
                    break;
                }
            }
        }
        let header = match Header::parse(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                let _ = events.send(ConnectionEvent::Error(e));
                let _ = events.send(ConnectionEvent::Closed("malformed header".into()));
                break;
            }
        };
        if header.version != CURRENT_VERSION {
            let _ =
                events.send(ConnectionEvent::Error(SyncError::version_mismatch(header.version, CURRENT_VERSION)));
            let _ = events.send(ConnectionEvent::Closed("protocol version".into()));
            break;
        }

        if header.sequence_nr == SERVICE_SEQUENCE_NR {
            let mut body = vec![0u8; ACK_BODY_LEN];
            if read_half.read_exact(&mut body).await.is_err() {
                let _ = events.send(ConnectionEvent::Closed("read error in ack body".into()));
                break;
            }
            match AckBody::parse(&body) {
                Ok(ack) => {
                    debug!(acked = ack.acked_sequence_nr, received = ack.received_so_far, "peer ack received");
                }
                Err(e) => warn!(error = %e, "malformed ack body, ignoring"),
            }
            continue;
        }

        let mut chunk = vec![0u8; header.total_length as usize];
        if read_half.read_exact(&mut chunk).await.is_err() {
            let _ = events.send(ConnectionEvent::Closed("read error in message body".into()));
            break;
        }

        let (received_so_far, completed_bytes) = match header.segment {
            Segment::Whole => {
                if reassembly.is_some() {
                    warn!(
                        resource_id = header.resource_id,
                        sequence_nr = header.sequence_nr,
                        "whole message while reassembly in progress; discarding partial"
                    );
                    reassembly = None;
                }
                (chunk.len() as u64, Some(chunk))
            }
            Segment::First => {
                if reassembly.is_some() {
                    warn!(
                        resource_id = header.resource_id,
                        sequence_nr = header.sequence_nr,
                        "out-of-order first segment; discarding prior partial"
                    );
                }
                let received = chunk.len() as u64;
                reassembly = Some(Reassembly { resource_id: header.resource_id, sequence_nr: header.sequence_nr, buffer: chunk });
                (received, None)
            }
            Segment::Middle => match &mut reassembly {
                Some(r) if r.resource_id == header.resource_id && r.sequence_nr == header.sequence_nr => {
                    r.buffer.extend_from_slice(&chunk);
                    (r.buffer.len() as u64, None)
                }
                _ => {
                    warn!(
                        resource_id = header.resource_id,
                        sequence_nr = header.sequence_nr,
                        "out-of-order middle segment; no matching reassembly, discarding"
                    );
                    continue;
                }
            },
            Segment::Last => match reassembly.take() {
                Some(mut r) if r.resource_id == header.resource_id && r.sequence_nr == header.sequence_nr => {
                    r.buffer.extend_from_slice(&chunk);
                    let total = r.buffer.len() as u64;
                    (total, Some(r.buffer))
                }
                _ => {
                    warn!(
                        resource_id = header.resource_id,
                        sequence_nr = header.sequence_nr,
                        "out-of-order last segment; no matching reassembly, discarding"
                    );
                    continue;
                }
            },
        };

        let _ = events.send(ConnectionEvent::Progress {
            resource_id: header.resource_id,
            sequence_nr: header.sequence_nr,
            received_so_far,
            total_length: received_so_far,
        });

        if let Some(body_bytes) = completed_bytes {
            let fatal =
                deliver(&body_bytes, header.resource_id, header.sequence_nr, &events, &pending, &commands, &next_sequence_nr)
                    .await;
            if fatal {
                let _ = events.send(ConnectionEvent::Closed("unparseable message".into()));
                break;
            }
        }

        let ack = AckBody { acked_sequence_nr: header.sequence_nr, received_so_far, total_length: received_so_far };
        if commands.send(Command::Ack(ack)).is_err() {
            let _ = events.send(ConnectionEvent::Closed("writer task gone while acking".into()));
            break;
        }
    }
}

/// Delivers one reassembled body. Returns `true` if the connection must
/// tear down: spec §4.1 requires that any exception while parsing a
/// message produce an `error` reply, a `reloadApplication` message to the
/// peer, a flush, and teardown.
async fn deliver(
    body_bytes: &[u8],
    resource_id: u64,
    sequence_nr: u64,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    pending: &Arc<AsyncMutex<PendingReplies>>,
    commands: &mpsc::UnboundedSender<Command>,
    next_sequence_nr: &Arc<AtomicU64>,
) -> bool {
    let body: serde_json::Value = match serde_json::from_slice(body_bytes) {
        Ok(v) => v,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Error(SyncError::decode(format!("invalid message JSON: {e}"))));
            send_parse_failure_teardown(resource_id, sequence_nr, e.to_string(), commands, next_sequence_nr);
            return true;
        }
    };
    let message = InboundMessage { resource_id, sequence_nr, body };
    if let Some(in_reply_to) = message.in_reply_to() {
        let handler = {
            let mut guard = pending.lock().await;
            guard.deadlines.remove(&in_reply_to);
            guard.handlers.remove(&in_reply_to)
        };
        if let Some(handler) = handler {
            let _ = handler.send(Ok(message));
            return false;
        }
        // Pending-reply handler already gone (e.g. after reconnect): the
        // source silently ignores this case rather than asserting.
        return false;
    }
    let _ = events.send(ConnectionEvent::Message(message));
    false
}

/// Queues the error reply and `reloadApplication` message a parse
/// failure owes the peer, then an immediate flush. Best-effort: if the
/// writer task is already gone there is nothing left to notify.
fn send_parse_failure_teardown(
    resource_id: u64,
    in_reply_to: u64,
    description: String,
    commands: &mpsc::UnboundedSender<Command>,
    next_sequence_nr: &Arc<AtomicU64>,
) {
    let error_reply = Envelope::reply_to(Message::Error { description }, in_reply_to).to_json();
    if let Ok(body) = serde_json::to_vec(&error_reply) {
        let sequence_nr = next_sequence_nr.fetch_add(1, Ordering::SeqCst);
        let _ = commands.send(Command::Send { resource_id, sequence_nr, body, reply_to: None });
    }
    let reload = Envelope::new(Message::ReloadApplication { reason: "unparseable message".into() }).to_json();
    if let Ok(body) = serde_json::to_vec(&reload) {
        let sequence_nr = next_sequence_nr.fetch_add(1, Ordering::SeqCst);
        let _ = commands.send(Command::Send { resource_id, sequence_nr, body, reply_to: None });
    }
    let _ = commands.send(Command::Flush);
}

async fn reply_timeout_task(
    pending: Arc<AsyncMutex<PendingReplies>>,
    timeout: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut ticker = interval(Duration::from_millis(250).min(timeout));
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let expired: Vec<u64> = {
            let guard = pending.lock().await;
            guard.deadlines.iter().filter(|(_, deadline)| **deadline <= now).map(|(seq, _)| *seq).collect()
        };
        if expired.is_empty() {
            continue;
        }
        let mut guard = pending.lock().await;
        for seq in &expired {
            guard.deadlines.remove(seq);
            if let Some(handler) = guard.handlers.remove(seq) {
                let _ = handler.send(Err("reply timeout".into()));
            }
        }
        drop(guard);
        error!(count = expired.len(), "reply timeout, tearing down connection");
        let _ = events.send(ConnectionEvent::Error(SyncError::reply_timeout(expired[0])));
        let _ = events.send(ConnectionEvent::Closed("reply timeout".into()));
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_body_gets_error_reply_and_reload_then_teardown() {
        let (mut raw_peer, framed_stream) = tokio::io::duplex(1 << 16);
        let (_framed, mut events) = FramedConnection::spawn(framed_stream, FramedConnectionConfig::default());
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Open)));

        let bad_body = b"not json";
        let header = Header::new(CURRENT_VERSION, Segment::Whole, 3, 42, bad_body.len() as u64);
        raw_peer.write_all(header.format().as_bytes()).await.unwrap();
        raw_peer.write_all(bad_body).await.unwrap();
        raw_peer.flush().await.unwrap();

        let mut saw_error = false;
        let mut saw_closed = false;
        loop {
            match events.recv().await {
                Some(ConnectionEvent::Error(_)) => saw_error = true,
                Some(ConnectionEvent::Closed(_)) => {
                    saw_closed = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_error, "expected a decode error event");
        assert!(saw_closed, "expected teardown after an unparseable message");

        // The peer should have received the replies this side owes it:
        // an error reply followed by reloadApplication, both Segment::Whole.
        let mut header_buf = [0u8; HEADER_LEN];
        raw_peer.read_exact(&mut header_buf).await.unwrap();
        let first = Header::parse(&header_buf).unwrap();
        let mut body = vec![0u8; first.total_length as usize];
        raw_peer.read_exact(&mut body).await.unwrap();
        let first_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(first_json["type"], "error");
        assert_eq!(first_json["inReplyTo"], 42);

        raw_peer.read_exact(&mut header_buf).await.unwrap();
        let second = Header::parse(&header_buf).unwrap();
        let mut body = vec![0u8; second.total_length as usize];
        raw_peer.read_exact(&mut body).await.unwrap();
        let second_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(second_json["type"], "reloadApplication");
    }
}
