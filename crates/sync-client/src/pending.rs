//! Pending-write bookkeeping and queued-update deferral (spec §3, §4.4,
//! scenario C). Tracks, per `(resourceId, identifier)`, the most recent
//! in-flight write and any `resourceUpdate` that arrived for that
//! identifier while the write was still outstanding.

use std::collections::{BTreeMap, HashMap};
use sync_core::Value;

#[derive(Clone, Debug)]
struct QueuedUpdate {
    revision: u64,
    value: Value,
}

#[derive(Clone, Debug)]
struct PendingEntry {
    ack_id: u64,
    entry: Value,
    queued_update: Option<QueuedUpdate>,
}

/// What the caller should do with an incoming `resourceUpdate` for one
/// identifier.
#[derive(Debug, PartialEq)]
pub enum UpdateDisposition {
    /// No pending write for this identifier; surface it to the consumer.
    Apply,
    /// A write is pending; the update has been buffered as `queuedUpdate`
    /// and must not reach the consumer until the ack arrives.
    Deferred,
}

#[derive(Default)]
pub struct PendingWrites {
    /// Staged, not-yet-flushed writes: last-write-wins per identifier
    /// within a resource's batch.
    staged: HashMap<u64, BTreeMap<String, Value>>,
    /// In-flight writes awaiting acknowledgement, keyed by
    /// `(resourceId, identifier)`.
    inflight: HashMap<(u64, String), PendingEntry>,
    next_ack_id: u64,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self { staged: HashMap::new(), inflight: HashMap::new(), next_ack_id: 1 }
    }

    /// Queues `value` for `ident` onto `resource_id`'s staging batch.
    /// Overwrites any value already staged for the same identifier.
    pub fn queue(&mut self, resource_id: u64, ident: impl Into<String>, value: Value) {
        self.staged.entry(resource_id).or_default().insert(ident.into(), value);
    }

    pub fn has_staged(&self, resource_id: u64) -> bool {
        self.staged.get(&resource_id).is_some_and(|b| !b.is_empty())
    }

    pub fn any_staged(&self) -> bool {
        self.staged.values().any(|b| !b.is_empty())
    }

    pub fn staged_resources(&self) -> Vec<u64> {
        self.staged.iter().filter(|(_, b)| !b.is_empty()).map(|(id, _)| *id).collect()
    }

    /// Drains `resource_id`'s staged batch into a fresh in-flight entry,
    /// returning `(ackId, elements)` for the caller to marshal and send.
    /// Returns `None` if nothing was staged.
    pub fn flush(&mut self, resource_id: u64) -> Option<(u64, Vec<(String, Value)>)> {
        let batch = self.staged.remove(&resource_id)?;
        if batch.is_empty() {
            return None;
        }
        let ack_id = self.next_ack_id;
        self.next_ack_id += 1;
        let mut elements = Vec::with_capacity(batch.len());
        for (ident, value) in batch {
            let queued_update = self
                .inflight
                .remove(&(resource_id, ident.clone()))
                .and_then(|prior| prior.queued_update);
            self.inflight
                .insert((resource_id, ident.clone()), PendingEntry { ack_id, entry: value.clone(), queued_update });
            elements.push((ident, value));
        }
        Some((ack_id, elements))
    }

    /// Applies a `resourceUpdate` for one identifier. See
    /// [`UpdateDisposition`].
    pub fn handle_update(&mut self, resource_id: u64, ident: &str, revision: u64, value: &Value) -> UpdateDisposition {
        match self.inflight.get_mut(&(resource_id, ident.to_string())) {
            Some(entry) => {
                let should_replace = match &entry.queued_update {
                    Some(existing) => revision > existing.revision,
                    None => true,
                };
                if should_replace {
                    entry.queued_update = Some(QueuedUpdate { revision, value: value.clone() });
                }
                UpdateDisposition::Deferred
            }
            None => UpdateDisposition::Apply,
        }
    }

    /// Applies a write acknowledgement at `revision` for `ack_id`,
    /// covering `idents`. Returns the `(ident, value)` pairs that should
    /// now be surfaced to the consumer: entries whose `ackId` matches are
    /// removed and their latest value (queued update if its revision
    /// exceeds `revision`, else the acknowledged write's own value) is
    /// returned. Entries superseded by a newer write (a different,
    /// outstanding `ackId`) are left untouched (spec §4.4).
    pub fn handle_ack(&mut self, resource_id: u64, ack_id: u64, revision: u64, idents: &[String]) -> Vec<(String, Value)> {
        let mut surfaced = Vec::new();
        for ident in idents {
            let key = (resource_id, ident.clone());
            let matches = matches!(self.inflight.get(&key), Some(entry) if entry.ack_id == ack_id);
            if matches {
                let entry = self.inflight.remove(&key).expect("checked above");
                let value = match entry.queued_update {
                    Some(q) if q.revision > revision => q.value,
                    _ => entry.entry,
                };
                surfaced.push((ident.clone(), value));
            }
        }
        surfaced
    }

    /// Re-stages every still-pending write (across all resources) under a
    /// fresh `ackId`, for resubmission after reconnect (spec §4.4). Clears
    /// all in-flight bookkeeping; the caller is expected to immediately
    /// send the returned batches and record new in-flight entries via
    /// [`PendingWrites::flush`]-equivalent bookkeeping, which this method
    /// performs for them.
    pub fn resubmit_all(&mut self) -> Vec<(u64, u64, Vec<(String, Value)>)> {
        let mut by_resource: HashMap<u64, Vec<(String, PendingEntry)>> = HashMap::new();
        for ((resource_id, ident), entry) in self.inflight.drain() {
            by_resource.entry(resource_id).or_default().push((ident, entry));
        }
        let mut batches = Vec::with_capacity(by_resource.len());
        for (resource_id, entries) in by_resource {
            let ack_id = self.next_ack_id;
            self.next_ack_id += 1;
            let mut elements = Vec::with_capacity(entries.len());
            for (ident, entry) in entries {
                elements.push((ident.clone(), entry.entry.clone()));
                self.inflight.insert(
                    (resource_id, ident),
                    PendingEntry { ack_id, entry: entry.entry, queued_update: entry.queued_update },
                );
            }
            batches.push((resource_id, ack_id, elements));
        }
        batches
    }

    pub fn is_pending(&self, resource_id: u64, ident: &str) -> bool {
        self.inflight.contains_key(&(resource_id, ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::Value;

    #[test]
    fn scenario_c_ack_then_overwrite_then_ack() {
        let mut p = PendingWrites::new();
        p.queue(7, "X", Value::number(1.0));
        let (ack1, _) = p.flush(7).unwrap();
        assert_eq!(ack1, 1);

        p.queue(7, "X", Value::number(2.0));
        let (ack2, _) = p.flush(7).unwrap();
        assert_eq!(ack2, 2);
        assert!(p.is_pending(7, "X"));

        // Fanout for write#1 (revision 5) arrives while (7,X) is pending
        // under ackId=2: deferred, stored as queuedUpdate.
        let disposition = p.handle_update(7, "X", 5, &Value::number(1.0));
        assert_eq!(disposition, UpdateDisposition::Deferred);

        // Ack for write#1 (ackId=1, revision=5): entry's ackId is 2, no removal.
        let surfaced = p.handle_ack(7, ack1, 5, &["X".to_string()]);
        assert!(surfaced.is_empty());
        assert!(p.is_pending(7, "X"), "entry must remain, queuedUpdate intact");

        // Ack for write#2 (ackId=2, revision=6): removed; queuedUpdate.revision(5) < 6,
        // so the surfaced value is write#2's own value (2.0), not the queued one.
        let surfaced = p.handle_ack(7, ack2, 6, &["X".to_string()]);
        assert_eq!(surfaced, vec![("X".to_string(), Value::number(2.0))]);
        assert!(!p.is_pending(7, "X"));
    }

    #[test]
    fn update_with_no_pending_write_applies_directly() {
        let mut p = PendingWrites::new();
        assert_eq!(p.handle_update(7, "Y", 1, &Value::number(0.0)), UpdateDisposition::Apply);
    }

    #[test]
    fn queued_update_keeps_higher_revision_on_collision() {
        let mut p = PendingWrites::new();
        p.queue(7, "X", Value::number(1.0));
        p.flush(7);
        p.handle_update(7, "X", 3, &Value::number(10.0));
        p.handle_update(7, "X", 2, &Value::number(20.0)); // lower revision, ignored
        let surfaced = p.handle_ack(7, 1, 9, &["X".to_string()]);
        // queuedUpdate.revision(3) < ack revision(9), so ack's own value wins.
        assert_eq!(surfaced, vec![("X".to_string(), Value::number(1.0))]);
    }

    #[test]
    fn resubmit_all_assigns_fresh_ack_ids() {
        let mut p = PendingWrites::new();
        p.queue(7, "X", Value::number(1.0));
        let (old_ack, _) = p.flush(7).unwrap();
        let batches = p.resubmit_all();
        assert_eq!(batches.len(), 1);
        let (resource_id, new_ack, elements) = &batches[0];
        assert_eq!(*resource_id, 7);
        assert_ne!(*new_ack, old_ack);
        assert_eq!(elements, &vec![("X".to_string(), Value::number(1.0))]);
        assert!(p.is_pending(7, "X"));
    }
}
