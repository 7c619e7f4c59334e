//! A single operational report combining spool, dedupe, and capture state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_capture::CaptureSession;

use crate::capture::{CaptureSnapshot, DedupeSnapshot, capture_snapshot, dedupe_snapshot};
use crate::spool::{SpoolSnapshot, spool_snapshot};

/// Combined, read-only operational snapshot handed to a collaborator.
///
/// Nothing here is owned state: every field is derived fresh from the live
/// store, index, and session at the moment [`collect`] is called.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OperationalReport {
    /// Spool health and capacity.
    pub spool: SpoolSnapshot,
    /// Dedupe index size.
    pub dedupe: DedupeSnapshot,
    /// Capture session lifecycle state.
    pub capture: CaptureSnapshot,
}

/// Collect a full [`OperationalReport`] for `session`, locking its
/// underlying store only long enough to read its counters.
pub async fn collect(session: &CaptureSession) -> OperationalReport {
    let store = session.store();
    let spool = {
        let guard = store.lock().await;
        spool_snapshot(&guard)
    };
    OperationalReport {
        spool,
        dedupe: dedupe_snapshot(session.dedupe().as_ref()).await,
        capture: capture_snapshot(session),
    }
}
