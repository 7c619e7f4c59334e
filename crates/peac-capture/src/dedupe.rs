//! Dedupe index (§4.3): keyed by `action.id`, async to permit durable
//! back-ends beyond the in-memory default.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use peac_core::DedupeEntry;

/// Durable or in-memory store of [`DedupeEntry`] records, keyed by action id.
///
/// Invariant (§4.3): for every persisted `SpoolEntry`, the dedupe index
/// contains a corresponding entry with the same `sequence` and
/// `entry_digest` before the next capture proceeds — [`CaptureSession`]
/// enforces this by writing the dedupe entry as the last pipeline step.
#[async_trait]
pub trait DedupeIndex: Send + Sync {
    /// Fetch the entry for `action_id`, if any.
    async fn get(&self, action_id: &str) -> Option<DedupeEntry>;
    /// Insert or overwrite the entry for `action_id`.
    async fn set(&self, action_id: &str, entry: DedupeEntry);
    /// Whether `action_id` has a recorded entry.
    async fn has(&self, action_id: &str) -> bool;
    /// Mark a recorded entry as emitted (e.g. surfaced in a receipt).
    async fn mark_emitted(&self, action_id: &str);
    /// Remove the entry for `action_id`, if any.
    async fn delete(&self, action_id: &str);
    /// Number of recorded entries.
    async fn size(&self) -> usize;
    /// Remove every recorded entry.
    async fn clear(&self);
}

/// Default, process-local [`DedupeIndex`] backed by a [`HashMap`].
#[derive(Default)]
pub struct InMemoryDedupeIndex {
    entries: Mutex<HashMap<String, DedupeEntry>>,
}

impl InMemoryDedupeIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupeIndex for InMemoryDedupeIndex {
    async fn get(&self, action_id: &str) -> Option<DedupeEntry> {
        self.entries.lock().unwrap().get(action_id).cloned()
    }

    async fn set(&self, action_id: &str, entry: DedupeEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(action_id.to_string(), entry);
    }

    async fn has(&self, action_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(action_id)
    }

    async fn mark_emitted(&self, action_id: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(action_id) {
            entry.emitted = true;
        }
    }

    async fn delete(&self, action_id: &str) {
        self.entries.lock().unwrap().remove(action_id);
    }

    async fn size(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    async fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
