//! `SpoolEntry`: the persisted record, and the chain invariants that bind one
//! entry to the next (§3 Chain invariants, §8 quantified invariants).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_canon::{Digest, canonicalize, sha256_hex};
use peac_error::{ErrorCode, PeacError};

use crate::action::{CapturedAction, StrippedAction};

/// 64 zero hex chars, the `prev_entry_digest` of the first entry in a chain.
///
/// Computed rather than hand-typed as a string literal so the length can
/// never silently drift from 64.
pub fn genesis_digest() -> String {
    "0".repeat(64)
}

/// A single persisted spool record (§3 SpoolEntry).
///
/// `entry_digest` is computed over every other field (`JCS(entry minus
/// entry_digest)`), so field order here only affects the in-memory struct,
/// never the canonical bytes that get hashed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SpoolEntry {
    /// Derived from the action's own timestamps (`completed_at ?? started_at`),
    /// never read from the wall clock.
    pub captured_at: String,
    /// The captured action, minus raw input/output bytes.
    pub action: StrippedAction,
    /// Digest of `input_bytes`, if the action carried any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_digest: Option<Digest>,
    /// Digest of `output_bytes`, if the action carried any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<Digest>,
    /// `entry_digest` of the preceding entry, or [`genesis_digest`] for the first.
    pub prev_entry_digest: String,
    /// `sha256_hex(JCS(self minus entry_digest))`.
    pub entry_digest: String,
    /// Monotonic, 1-based position in the chain.
    pub sequence: u64,
}

/// The subset of [`SpoolEntry`] that gets hashed to produce `entry_digest`:
/// every field except `entry_digest` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryDigestInput<'a> {
    captured_at: &'a str,
    action: &'a StrippedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_digest: &'a Option<Digest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_digest: &'a Option<Digest>,
    prev_entry_digest: &'a str,
    sequence: u64,
}

/// Everything needed to build a [`SpoolEntry`] for a freshly captured action,
/// minus the entry digest (which is computed from the rest).
pub struct EntrySkeleton {
    /// See [`SpoolEntry::captured_at`].
    pub captured_at: String,
    /// See [`SpoolEntry::action`].
    pub action: StrippedAction,
    /// See [`SpoolEntry::input_digest`].
    pub input_digest: Option<Digest>,
    /// See [`SpoolEntry::output_digest`].
    pub output_digest: Option<Digest>,
    /// See [`SpoolEntry::prev_entry_digest`].
    pub prev_entry_digest: String,
    /// See [`SpoolEntry::sequence`].
    pub sequence: u64,
}

impl EntrySkeleton {
    /// Build the skeleton for the first entry to follow `action`, chained
    /// after a store reporting `head_digest`/`head_sequence`.
    pub fn for_action(
        action: &CapturedAction,
        input_digest: Option<Digest>,
        output_digest: Option<Digest>,
        head_digest: &str,
        head_sequence: u64,
    ) -> Self {
        Self {
            captured_at: action.captured_at(),
            action: action.strip(),
            input_digest,
            output_digest,
            prev_entry_digest: head_digest.to_string(),
            sequence: head_sequence + 1,
        }
    }

    /// Compute `entry_digest` and assemble the final [`SpoolEntry`]
    /// (§4.4 step 7: `entry_digest = sha256_hex(JCS(entry minus entry_digest))`).
    pub fn finish(self) -> Result<SpoolEntry, PeacError> {
        let digest_input = EntryDigestInput {
            captured_at: &self.captured_at,
            action: &self.action,
            input_digest: &self.input_digest,
            output_digest: &self.output_digest,
            prev_entry_digest: &self.prev_entry_digest,
            sequence: self.sequence,
        };
        let entry_digest = digest_entry_fields(&digest_input)?;
        Ok(SpoolEntry {
            captured_at: self.captured_at,
            action: self.action,
            input_digest: self.input_digest,
            output_digest: self.output_digest,
            prev_entry_digest: self.prev_entry_digest,
            entry_digest,
            sequence: self.sequence,
        })
    }
}

fn digest_entry_fields(fields: &EntryDigestInput<'_>) -> Result<String, PeacError> {
    let value = serde_json::to_value(fields)
        .map_err(|e| PeacError::new(ErrorCode::EvidenceNotJson, e.to_string()))?;
    let jcs = canonicalize(&value).map_err(PeacError::from)?;
    Ok(sha256_hex(jcs.as_bytes()))
}

impl SpoolEntry {
    /// Recompute `entry_digest` from this entry's own fields and compare it
    /// against the stored value (§8: `eᵢ.entry_digest = sha256_hex(JCS(eᵢ \
    /// entry_digest))`).
    pub fn recompute_entry_digest(&self) -> Result<String, PeacError> {
        let digest_input = EntryDigestInput {
            captured_at: &self.captured_at,
            action: &self.action,
            input_digest: &self.input_digest,
            output_digest: &self.output_digest,
            prev_entry_digest: &self.prev_entry_digest,
            sequence: self.sequence,
        };
        digest_entry_fields(&digest_input)
    }

    /// Whether this entry's stored `entry_digest` matches its own content.
    pub fn digest_is_self_consistent(&self) -> bool {
        self.recompute_entry_digest()
            .map(|computed| computed == self.entry_digest)
            .unwrap_or(false)
    }

    /// Whether `self` may legally follow `prev` in a chain: sequence
    /// increases by exactly one, and `prev_entry_digest` matches `prev`'s
    /// `entry_digest` (§3 Chain invariants).
    pub fn links_after(&self, prev: &SpoolEntry) -> bool {
        self.sequence == prev.sequence + 1 && self.prev_entry_digest == prev.entry_digest
    }

    /// Whether `self` is a legal first entry: sequence 1, prev == genesis.
    pub fn is_valid_genesis(&self) -> bool {
        self.sequence == 1 && self.prev_entry_digest == genesis_digest()
    }
}
