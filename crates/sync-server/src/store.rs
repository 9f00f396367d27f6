//! Reference [`BackingStore`] implementation: an in-process, append-only
//! log per resource plus the template/index lists the registry records
//! optimistically. Not durable — exists so `sync-server` is runnable and
//! testable end-to-end without an external database (spec §1 treats the
//! real store as out of scope).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use sync_core::{
    BackingStore, IndexEntry, IndexId, Result, StoredElement, TemplateEntry, TemplateId, Value,
};

#[derive(Default)]
struct Log {
    elements: Vec<StoredElement>,
    revision: u64,
}

#[derive(Default)]
pub struct InMemoryStore {
    logs: Mutex<HashMap<u64, Log>>,
    templates: Mutex<Vec<(TemplateId, TemplateEntry)>>,
    indices: Mutex<Vec<(IndexId, IndexEntry)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every template/index allocation recorded so far, for
    /// feeding [`sync_core::ServerPaidRegistry::preload`] on startup.
    pub fn preload_snapshot(&self) -> (Vec<(TemplateId, TemplateEntry)>, Vec<(IndexId, IndexEntry)>) {
        (self.templates.lock().clone(), self.indices.lock().clone())
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn add_template(&self, id: TemplateId, entry: TemplateEntry) {
        self.templates.lock().push((id, entry));
    }

    async fn add_index(&self, id: IndexId, entry: IndexEntry) {
        self.indices.lock().push((id, entry));
    }

    async fn append(&self, resource_id: u64, elements: Vec<(String, Value)>) -> Result<u64> {
        let mut logs = self.logs.lock();
        let log = logs.entry(resource_id).or_default();
        log.revision += 1;
        let revision = log.revision;
        for (identifier, value) in elements {
            log.elements.push(StoredElement { revision, identifier, value });
        }
        Ok(revision)
    }

    async fn range(&self, resource_id: u64, from_revision: u64) -> Vec<StoredElement> {
        let logs = self.logs.lock();
        match logs.get(&resource_id) {
            Some(log) => log.elements.iter().filter(|e| e.revision > from_revision).cloned().collect(),
            None => Vec::new(),
        }
    }
}
