//! Read-only snapshots of a [`CaptureSession`] and its dedupe index.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_capture::{CaptureSession, DedupeIndex};

/// Point-in-time snapshot of a capture session's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CaptureSnapshot {
    /// Whether [`CaptureSession::close`] has been called.
    pub closed: bool,
}

/// Take a read-only snapshot of `session`'s lifecycle state.
pub fn capture_snapshot(session: &CaptureSession) -> CaptureSnapshot {
    CaptureSnapshot {
        closed: session.is_closed(),
    }
}

/// Point-in-time snapshot of a dedupe index's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DedupeSnapshot {
    /// Number of action ids currently tracked.
    pub tracked_entries: usize,
}

/// Take a read-only snapshot of `index`'s current size.
pub async fn dedupe_snapshot(index: &dyn DedupeIndex) -> DedupeSnapshot {
    DedupeSnapshot {
        tracked_entries: index.size().await,
    }
}
