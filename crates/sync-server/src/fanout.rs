//! Per-resource fanout lists (spec §4.5, §5 "shared state"): every
//! session subscribed to a resource gets every committed update,
//! including the sender. Guarded so a session joining or leaving mid-fanout
//! never disturbs an in-flight iteration — dropped sessions are pruned
//! lazily rather than synchronously on disconnect.

use dashmap::DashMap;
use sync_core::Value;
use tokio::sync::mpsc;

/// One committed write batch, ready to be marshalled and sent by whichever
/// session's codec receives it.
#[derive(Clone, Debug)]
pub struct FanoutMessage {
    pub resource_id: u64,
    pub revision: u64,
    pub elements: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct FanoutRegistry {
    subscribers: DashMap<u64, DashMap<u64, mpsc::UnboundedSender<FanoutMessage>>>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, resource_id: u64, session_id: u64, sender: mpsc::UnboundedSender<FanoutMessage>) {
        self.subscribers.entry(resource_id).or_default().insert(session_id, sender);
    }

    /// Idempotent (spec §5: "unsubscribe is idempotent").
    pub fn unsubscribe(&self, resource_id: u64, session_id: u64) {
        if let Some(sessions) = self.subscribers.get(&resource_id) {
            sessions.remove(&session_id);
        }
    }

    /// Delivers `message` to every session subscribed to `message.resource_id`,
    /// pruning any sender whose receiver has been dropped.
    pub fn publish(&self, message: FanoutMessage) {
        let Some(sessions) = self.subscribers.get(&message.resource_id) else {
            return;
        };
        let mut dead = Vec::new();
        for entry in sessions.iter() {
            if entry.value().send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for session_id in dead {
            sessions.remove(&session_id);
        }
    }
}
