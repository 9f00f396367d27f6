//! The persistent backing store interface. Treated as an opaque
//! collaborator: this crate only depends on its shape
//! (`append`/`range`/`add_template`/`add_index`), never on an
//! implementation. A conformant in-memory implementation lives in
//! `sync-server` for end-to-end testing; the real store is out of scope.

use crate::error::Result;
use crate::ids::{IndexEntry, IndexId, TemplateEntry, TemplateId};
use crate::value::Value;
use async_trait::async_trait;

/// One committed element at a given revision, as returned by
/// [`BackingStore::range`].
#[derive(Clone, Debug, PartialEq)]
pub struct StoredElement {
    pub revision: u64,
    pub identifier: String,
    pub value: Value,
}

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Records a newly-allocated template ID. Called optimistically by the
    /// server-side PAID registry — the caller does not await completion
    /// before proceeding.
    async fn add_template(&self, id: TemplateId, entry: TemplateEntry);

    /// Records a newly-allocated index ID. See [`BackingStore::add_template`].
    async fn add_index(&self, id: IndexId, entry: IndexEntry);

    /// Appends a whole write batch to a resource's log under one shared
    /// revision, returning that revision. All elements in one `write`
    /// message share exactly one revision (spec §4.5) — that is the unit
    /// this interface commits, rather than one element at a time. An `Err`
    /// means the batch is a no-op: no revision is consumed (spec §7).
    async fn append(&self, resource_id: u64, elements: Vec<(String, Value)>) -> Result<u64>;

    /// Elements committed at a revision strictly greater than
    /// `from_revision`, oldest first.
    async fn range(&self, resource_id: u64, from_revision: u64) -> Vec<StoredElement>;
}
