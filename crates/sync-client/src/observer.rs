//! Callback surfaces the client notifies: connection lifecycle (spec
//! §4.4 state machine), resource updates, and login status. Grounded in
//! the teacher's small-scale observability facade pattern
//! (`spark-core::observability::facade`) but scoped down to exactly what
//! this crate needs to hand to integrators — no metrics/tracing backend
//! is assumed, callers wire their own.

use sync_core::Value;

/// The four states a connection's consumers are notified about (spec
/// §4.4): `(0,"")` on open, `(1,reason)` on close-with-reconnect,
/// `(2,reason)` on an explicit `terminate` message, `(3,reason)` on
/// `reloadApplication`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStateCode {
    Open = 0,
    ClosedWillReconnect = 1,
    Terminated = 2,
    ReloadApplication = 3,
}

/// Notified of connection lifecycle transitions.
pub trait ConnectionObserver: Send + Sync {
    fn on_state(&self, code: ConnectionStateCode, reason: &str);
}

/// Receives resource updates for a subscription, keyed by the element
/// identifier's dotted-string form (spec §3 "Element identifier").
pub trait ResourceConsumer: Send + Sync {
    fn on_update(&self, ident: &str, value: &Value);
}

/// Receives `loginStatus` replies (spec §6).
pub trait StatusWatcher: Send + Sync {
    fn on_login_status(&self, username: &str, authenticated: bool, reason: Option<&str>, login_seq_nr: u64);
}

/// No-op observer for callers that don't need lifecycle notifications.
pub struct NullObserver;

impl ConnectionObserver for NullObserver {
    fn on_state(&self, _code: ConnectionStateCode, _reason: &str) {}
}
