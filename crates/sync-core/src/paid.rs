//! The PAID (template/index) registry — two content-addressed DAGs that
//! answer "given this parent and child descriptor, give me a stable ID."
//! See spec §4.2.

use crate::ids::{ChildType, IndexEntry, IndexId, TemplateEntry, TemplateId};
use crate::store::BackingStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Monotonic counter shared by both DAGs. ID `1` is reserved for each
/// root and is never handed out by `allocate`.
struct Counter {
    next: u64,
}

impl Counter {
    fn new() -> Self {
        Self { next: 2 }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

struct TemplateTable {
    by_key: HashMap<String, TemplateId>,
    by_id: HashMap<TemplateId, TemplateEntry>,
    counter: Counter,
}

impl TemplateTable {
    fn new() -> Self {
        Self { by_key: HashMap::new(), by_id: HashMap::new(), counter: Counter::new() }
    }
}

struct IndexTable {
    by_key: HashMap<String, IndexId>,
    by_id: HashMap<IndexId, IndexEntry>,
    counter: Counter,
}

impl IndexTable {
    fn new() -> Self {
        Self { by_key: HashMap::new(), by_id: HashMap::new(), counter: Counter::new() }
    }
}

/// Lookup surface shared by [`PaidRegistry`] and [`ServerPaidRegistry`], so
/// the XDR codec's declaration-ordering logic (`crate::xdr::order`) does
/// not need to care which one it is talking to.
pub trait PaidLookup: Send + Sync {
    fn get_template_by_entry(
        &self,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: String,
        referred_id: Option<TemplateId>,
    ) -> TemplateId;
    fn get_index_by_entry(&self, entry: IndexEntry) -> IndexId;
    fn template_entry(&self, id: TemplateId) -> Option<TemplateEntry>;
    fn index_entry(&self, id: IndexId) -> Option<IndexEntry>;
}

/// Content-addressed template/index registry. All mutation is serialized
/// through `parking_lot::Mutex`; entries are never removed once allocated
/// (immortal for the lifetime of the process).
pub struct PaidRegistry {
    templates: Mutex<TemplateTable>,
    indices: Mutex<IndexTable>,
}

impl Default for PaidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PaidRegistry {
    pub fn new() -> Self {
        Self { templates: Mutex::new(TemplateTable::new()), indices: Mutex::new(IndexTable::new()) }
    }

    /// Looks up or allocates the template ID for `entry`. Two calls with an
    /// equal tuple always return the same ID; different tuples never
    /// collide (invariant 3, §8).
    pub fn get_template_by_entry(
        &self,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: impl Into<String>,
        referred_id: Option<TemplateId>,
    ) -> TemplateId {
        let entry = TemplateEntry::new(parent_id, child_type, child_name, referred_id);
        self.get_template(entry)
    }

    pub(crate) fn get_template(&self, entry: TemplateEntry) -> TemplateId {
        self.get_template_with_new_flag(entry).0
    }

    /// Same lookup-or-allocate as [`PaidRegistry::get_template`], but also
    /// reports whether this call was the one that allocated the ID — decided
    /// inside the same lock acquisition as the allocation itself, so two
    /// concurrent callers racing on the same new key can never both observe
    /// "new" (see [`ServerPaidRegistry::get_template_by_entry`]).
    pub(crate) fn get_template_with_new_flag(&self, entry: TemplateEntry) -> (TemplateId, bool) {
        let key = entry.canonical_key();
        let mut table = self.templates.lock();
        if let Some(id) = table.by_key.get(&key) {
            return (*id, false);
        }
        let id = TemplateId(table.counter.allocate());
        table.by_key.insert(key, id);
        table.by_id.insert(id, entry);
        (id, true)
    }

    pub fn get_index_by_entry(&self, entry: IndexEntry) -> IndexId {
        self.get_index_with_new_flag(entry).0
    }

    /// Index-DAG counterpart of [`PaidRegistry::get_template_with_new_flag`].
    pub(crate) fn get_index_with_new_flag(&self, entry: IndexEntry) -> (IndexId, bool) {
        let key = entry.canonical_key();
        let mut table = self.indices.lock();
        if let Some(id) = table.by_key.get(&key) {
            return (*id, false);
        }
        let id = IndexId(table.counter.allocate());
        table.by_key.insert(key, id);
        table.by_id.insert(id, entry);
        (id, true)
    }

    pub fn template_entry(&self, id: TemplateId) -> Option<TemplateEntry> {
        self.templates.lock().by_id.get(&id).cloned()
    }

    pub fn index_entry(&self, id: IndexId) -> Option<IndexEntry> {
        self.indices.lock().by_id.get(&id).cloned()
    }

    /// Every template entry currently known, ascending by ID. Used by the
    /// file-export codec, which dumps the whole registry rather than an
    /// incremental "newly declared" subset.
    pub fn all_templates(&self) -> Vec<(TemplateId, TemplateEntry)> {
        let table = self.templates.lock();
        let mut all: Vec<_> = table.by_id.iter().map(|(id, entry)| (*id, entry.clone())).collect();
        all.sort_by_key(|(id, _)| id.0);
        all
    }

    /// Index-DAG counterpart of [`PaidRegistry::all_templates`].
    pub fn all_indices(&self) -> Vec<(IndexId, IndexEntry)> {
        let table = self.indices.lock();
        let mut all: Vec<_> = table.by_id.iter().map(|(id, entry)| (*id, entry.clone())).collect();
        all.sort_by_key(|(id, _)| id.0);
        all
    }
}

impl PaidLookup for PaidRegistry {
    fn get_template_by_entry(
        &self,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: String,
        referred_id: Option<TemplateId>,
    ) -> TemplateId {
        PaidRegistry::get_template_by_entry(self, parent_id, child_type, child_name, referred_id)
    }

    fn get_index_by_entry(&self, entry: IndexEntry) -> IndexId {
        PaidRegistry::get_index_by_entry(self, entry)
    }

    fn template_entry(&self, id: TemplateId) -> Option<TemplateEntry> {
        PaidRegistry::template_entry(self, id)
    }

    fn index_entry(&self, id: IndexId) -> Option<IndexEntry> {
        PaidRegistry::index_entry(self, id)
    }
}

/// Server-side registry: on every newly-allocated ID, fires an optimistic,
/// un-awaited call into the backing store, and can rebuild its in-memory
/// state from a prior run via [`ServerPaidRegistry::preload`].
pub struct ServerPaidRegistry {
    inner: PaidRegistry,
    store: Arc<dyn BackingStore>,
}

impl ServerPaidRegistry {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { inner: PaidRegistry::new(), store }
    }

    pub fn inner(&self) -> &PaidRegistry {
        &self.inner
    }

    /// Replays prior allocations to reconstruct the counter and maps.
    pub fn preload(&self, templates: Vec<(TemplateId, TemplateEntry)>, indices: Vec<(IndexId, IndexEntry)>) {
        {
            let mut table = self.inner.templates.lock();
            for (id, entry) in templates {
                table.by_key.insert(entry.canonical_key(), id);
                table.counter.next = table.counter.next.max(id.0 + 1);
                table.by_id.insert(id, entry);
            }
        }
        {
            let mut table = self.inner.indices.lock();
            for (id, entry) in indices {
                table.by_key.insert(entry.canonical_key(), id);
                table.counter.next = table.counter.next.max(id.0 + 1);
                table.by_id.insert(id, entry);
            }
        }
    }

    pub fn get_template_by_entry(
        &self,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: impl Into<String>,
        referred_id: Option<TemplateId>,
    ) -> TemplateId {
        let entry = TemplateEntry::new(parent_id, child_type, child_name, referred_id);
        // "is new" is decided by the same lock acquisition that performs the
        // allocation, so two sessions racing on the same not-yet-known entry
        // can never both fire a store write for it (spec §5: registry
        // mutation is serialized).
        let (id, is_new) = self.inner.get_template_with_new_flag(entry.clone());
        if is_new {
            let store = self.store.clone();
            tokio::spawn(async move {
                store.add_template(id, entry).await;
            });
        }
        id
    }

    pub fn get_index_by_entry(&self, entry: IndexEntry) -> IndexId {
        let (id, is_new) = self.inner.get_index_with_new_flag(entry.clone());
        if is_new {
            let store = self.store.clone();
            tokio::spawn(async move {
                store.add_index(id, entry).await;
            });
        }
        id
    }
}

impl PaidLookup for ServerPaidRegistry {
    fn get_template_by_entry(
        &self,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: String,
        referred_id: Option<TemplateId>,
    ) -> TemplateId {
        ServerPaidRegistry::get_template_by_entry(self, parent_id, child_type, child_name, referred_id)
    }

    fn get_index_by_entry(&self, entry: IndexEntry) -> IndexId {
        ServerPaidRegistry::get_index_by_entry(self, entry)
    }

    fn template_entry(&self, id: TemplateId) -> Option<TemplateEntry> {
        self.inner.template_entry(id)
    }

    fn index_entry(&self, id: IndexId) -> Option<IndexEntry> {
        self.inner.index_entry(id)
    }
}
