//! `DedupeEntry`: the at-most-once record kept per `action.id` (§3, §4.3).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One dedupe-index record, keyed externally by `action.id`.
///
/// Created on first successful append; `emitted` is flipped by the emitter
/// once a receipt has been issued for the underlying entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DedupeEntry {
    /// Sequence number of the spool entry this dedupe record tracks.
    pub sequence: u64,
    /// `entry_digest` of that spool entry.
    pub entry_digest: String,
    /// `captured_at` of that spool entry (copied for cheap lookups).
    pub captured_at: String,
    /// Whether an emitter has issued a receipt for this entry yet.
    pub emitted: bool,
}

impl DedupeEntry {
    /// Build a fresh, not-yet-emitted dedupe record for a newly appended entry.
    pub fn new(sequence: u64, entry_digest: impl Into<String>, captured_at: impl Into<String>) -> Self {
        Self {
            sequence,
            entry_digest: entry_digest.into(),
            captured_at: captured_at.into(),
            emitted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_dedupe_entry_is_not_emitted() {
        let d = DedupeEntry::new(1, "abc", "2025-01-01T00:00:00Z");
        assert!(!d.emitted);
        assert_eq!(d.sequence, 1);
    }
}
