//! Per-resource subscription state: revision gap tracking between server
//! updates and own write acknowledgements (spec §3, §4.4, invariant 6,
//! scenario E).
//!
//! **Resolved ambiguity** (documented in `DESIGN.md`): spec §4.4's prose
//! collapse rule reads "any range `[a,b]` with `a ≤ R+1`", but applying
//! that literally to scenario E (§8) collapses the `[20,20]` ack range one
//! step too early, at the `resourceUpdate{revision:19}` step instead of
//! the following `resourceUpdate{revision:20}`. This implementation uses
//! `a ≤ revision` (no `+1`) as the collapse condition, which reproduces
//! scenario E exactly and is, by construction, the narrower of the two
//! readings (it never collapses a range the `R+1` formula wouldn't).

use serde_json::Value as Json;
use std::collections::HashMap;

/// Sorted, disjoint revision intervals `[a,b]` for which a write
/// acknowledgement has been received but a gap to `subscription.revision`
/// still exists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckRevisionRanges(Vec<(u64, u64)>);

impl AckRevisionRanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[(u64, u64)] {
        &self.0
    }

    /// Inserts `r` as a new point interval, merging with any interval that
    /// touches or overlaps it so the list stays sorted and disjoint.
    fn insert(&mut self, r: u64) {
        let mut lo = r;
        let mut hi = r;
        self.0.retain(|&(a, b)| {
            if b + 1 >= lo && a <= hi + 1 {
                lo = lo.min(a);
                hi = hi.max(b);
                false
            } else {
                true
            }
        });
        let pos = self.0.partition_point(|&(a, _)| a < lo);
        self.0.insert(pos, (lo, hi));
    }

    /// Pops and returns the first interval whose start is `<= revision`
    /// (i.e. already reachable from the continuous prefix), if any.
    fn take_collapsible(&mut self, revision: u64) -> Option<(u64, u64)> {
        let idx = self.0.iter().position(|&(a, _)| a <= revision)?;
        Some(self.0.remove(idx))
    }
}

/// Client-side view of one subscribed resource (spec §3 "Subscription").
#[derive(Clone, Debug)]
pub struct Subscription {
    pub resource_id: u64,
    pub spec: Json,
    /// Highest revision for which a continuous run of updates has been
    /// received.
    pub revision: u64,
    pub ack_revision: AckRevisionRanges,
    pub ack_revision_by_ident: HashMap<String, u64>,
}

impl Subscription {
    pub fn new(resource_id: u64, spec: Json, revision: u64) -> Self {
        Self { resource_id, spec, revision, ack_revision: AckRevisionRanges::default(), ack_revision_by_ident: HashMap::new() }
    }

    /// `true` if an identifier's update at `update_revision` must be
    /// discarded as stale (invariant 7): a write-ack for a later revision
    /// of the same identifier has already been observed.
    pub fn is_stale(&self, ident: &str, update_revision: u64) -> bool {
        matches!(self.ack_revision_by_ident.get(ident), Some(&acked) if update_revision <= acked)
    }

    /// Applies a `resourceUpdate(revision=R)`. Returns `true` if `R`
    /// advanced the continuous prefix (i.e. the update was not itself a
    /// complete no-op); the caller still separately checks
    /// [`Subscription::is_stale`] per identifier before surfacing values.
    pub fn on_update(&mut self, r: u64) -> bool {
        if r <= self.revision {
            return false;
        }
        self.revision = r;
        self.collapse();
        true
    }

    /// Applies a write acknowledgement at revision `R` for `idents`.
    pub fn on_write_ack(&mut self, r: u64, idents: &[String]) {
        if self.revision == r.saturating_sub(1) {
            self.revision = r;
            self.collapse();
        } else {
            self.ack_revision.insert(r);
        }
        for ident in idents {
            let entry = self.ack_revision_by_ident.entry(ident.clone()).or_insert(0);
            *entry = (*entry).max(r);
        }
    }

    fn collapse(&mut self) {
        while let Some((_, b)) = self.ack_revision.take_collapsible(self.revision) {
            self.revision = self.revision.max(b);
        }
        if self.ack_revision.is_empty() {
            self.ack_revision_by_ident.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(revision: u64) -> Subscription {
        Subscription::new(7, serde_json::json!({}), revision)
    }

    #[test]
    fn scenario_e_stale_update_suppression() {
        let mut s = sub(15);
        s.on_write_ack(20, &["Y".to_string()]);
        assert_eq!(s.ack_revision.as_slice(), &[(20, 20)]);
        assert_eq!(s.ack_revision_by_ident.get("Y"), Some(&20));

        // Out-of-order update at 18 for Y: the caller must drop Y's
        // payload (is_stale), but the revision number still advances.
        assert!(s.is_stale("Y", 18));
        let advanced = s.on_update(18);
        assert!(advanced);
        assert_eq!(s.revision, 18);
        assert_eq!(s.ack_revision.as_slice(), &[(20, 20)], "no collapse yet");

        // revision 19 for Z: not stale, applied; still no collapse.
        assert!(!s.is_stale("Z", 19));
        s.on_update(19);
        assert_eq!(s.revision, 19);
        assert_eq!(s.ack_revision.as_slice(), &[(20, 20)]);

        // revision 20 finally collapses the outstanding ack range.
        s.on_update(20);
        assert_eq!(s.revision, 20);
        assert!(s.ack_revision.is_empty());
        assert!(s.ack_revision_by_ident.is_empty());
    }

    #[test]
    fn scenario_a_simple_write_ack_advance() {
        let mut s = sub(0);
        assert!(!s.on_update(0)); // initial empty resourceUpdate, no-op
        s.on_write_ack(1, &["1:1:context.x".to_string()]);
        assert_eq!(s.revision, 1);
        assert!(s.ack_revision.is_empty());
        // fanout for the same write is now <= revision, ignored.
        assert!(!s.on_update(1));
    }

    #[test]
    fn stale_update_ignored_entirely_below_revision() {
        let mut s = sub(10);
        assert!(!s.on_update(10));
        assert!(!s.on_update(5));
        assert_eq!(s.revision, 10);
    }

    #[test]
    fn simple_ack_advance_collapses_adjacent_range() {
        let mut s = sub(5);
        s.on_write_ack(7, &["a".into()]);
        assert_eq!(s.ack_revision.as_slice(), &[(7, 7)]);
        // ack for 6 arrives: subscription.revision(5) == R-1(6-1=5) -> simple advance,
        // which should also collapse the now-adjacent [7,7] range.
        s.on_write_ack(6, &["b".into()]);
        assert_eq!(s.revision, 7);
        assert!(s.ack_revision.is_empty());
    }

    #[test]
    fn disjoint_ranges_merge_when_touching() {
        let mut ranges = AckRevisionRanges::default();
        ranges.insert(10);
        ranges.insert(12);
        assert_eq!(ranges.as_slice(), &[(10, 10), (12, 12)]);
        ranges.insert(11);
        assert_eq!(ranges.as_slice(), &[(10, 12)]);
    }
}
