//! Read-only health and capacity snapshot of a [`SpoolStore`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_spool::{SpoolState, SpoolStore};

/// Fraction of a configured cap at which a store is reported `NearCapacity`.
const NEAR_CAPACITY_THRESHOLD: f64 = 0.9;

/// Rolled-up health of a spool store, derived from its cap state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpoolHealth {
    /// Accepting appends, comfortably under any configured cap.
    Active,
    /// Still accepting appends but within [`NEAR_CAPACITY_THRESHOLD`] of a
    /// configured entry or byte cap.
    NearCapacity {
        /// Human-readable detail.
        reason: String,
    },
    /// A cap has tripped or corruption was found; no further appends are
    /// accepted.
    ReadOnly {
        /// Human-readable detail.
        reason: String,
    },
}

/// Point-in-time, serialisable snapshot of a [`SpoolStore`]'s operational
/// state. Carries no reference back to the store: safe to hand to a
/// collaborator without granting write access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpoolSnapshot {
    /// Current chain sequence number.
    pub sequence: u64,
    /// Number of entries persisted so far.
    pub entry_count: u64,
    /// Current log file size in bytes.
    pub file_bytes: u64,
    /// Current chain head digest.
    pub head_digest: String,
    /// Configured entry cap, if any.
    pub max_entries: Option<u64>,
    /// Configured byte cap, if any.
    pub max_file_bytes: Option<u64>,
    /// Rolled-up health derived from the above.
    pub health: SpoolHealth,
}

/// Take a read-only snapshot of `store`'s current operational state.
pub fn spool_snapshot(store: &SpoolStore) -> SpoolSnapshot {
    SpoolSnapshot {
        sequence: store.sequence(),
        entry_count: store.entry_count(),
        file_bytes: store.file_bytes(),
        head_digest: store.head_digest().to_string(),
        max_entries: store.max_entries(),
        max_file_bytes: store.max_file_bytes(),
        health: compute_health(store),
    }
}

fn compute_health(store: &SpoolStore) -> SpoolHealth {
    if store.state() == SpoolState::ReadOnly {
        return SpoolHealth::ReadOnly {
            reason: "a configured cap tripped or corruption was detected".to_string(),
        };
    }

    let fractions = [
        store
            .max_entries()
            .map(|max| store.entry_count() as f64 / max as f64),
        store
            .max_file_bytes()
            .map(|max| store.file_bytes() as f64 / max as f64),
    ];
    if fractions
        .into_iter()
        .flatten()
        .any(|fraction| fraction >= NEAR_CAPACITY_THRESHOLD)
    {
        return SpoolHealth::NearCapacity {
            reason: format!(
                "within {}% of a configured cap",
                (NEAR_CAPACITY_THRESHOLD * 100.0) as u32
            ),
        };
    }

    SpoolHealth::Active
}
