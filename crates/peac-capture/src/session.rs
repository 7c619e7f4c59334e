//! `CaptureSession` (§4.4): the serialised pipeline binding a
//! [`CapturedAction`] to a [`SpoolEntry`] appended to the spool.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;

use peac_canon::{TruncateThreshold, digest};
use peac_core::{CapturedAction, DedupeEntry, EntrySkeleton, SpoolEntry};
use peac_error::ErrorCode;
use peac_spool::SpoolStore;

use crate::dedupe::DedupeIndex;

/// Outcome of a single [`CaptureSession::capture`] call. Never an `Err` —
/// every failure mode is represented as `Failure` (§4.4 "must never throw").
#[derive(Debug, Clone)]
pub enum CaptureResult {
    /// The action was appended and the dedupe index updated.
    Success {
        /// The persisted entry.
        entry: Box<SpoolEntry>,
    },
    /// The pipeline rejected or failed to process the action.
    Failure {
        /// One of the `E_CAPTURE_*` wire codes.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl CaptureResult {
    fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    /// `true` for [`CaptureResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A cooperative, internally-serialised queue binding captured actions to a
/// single spool and dedupe index (§5 Scheduling model).
///
/// Concurrent calls to [`capture`](Self::capture) may arrive from many
/// tasks; the internal mutex linearises steps 5–9 of the pipeline so
/// `sequence`/`head_digest` promotion never races, without requiring a
/// global lock beyond the spool's own single-writer lockfile.
pub struct CaptureSession {
    store: Arc<Mutex<SpoolStore>>,
    dedupe: Arc<dyn DedupeIndex>,
    truncate_threshold: TruncateThreshold,
    closed: std::sync::atomic::AtomicBool,
}

impl CaptureSession {
    /// Open a session over an already-opened spool store and dedupe index.
    pub fn new(
        store: SpoolStore,
        dedupe: Arc<dyn DedupeIndex>,
        truncate_threshold: TruncateThreshold,
    ) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            dedupe,
            truncate_threshold,
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Run the capture pipeline for `action` (§4.4 steps 1–9).
    ///
    /// Wraps the serialised section in [`catch_unwind`](std::panic::catch_unwind)
    /// so a single bad call (e.g. a panicking JSON conversion on malformed
    /// input) cannot poison the queue for subsequent callers; any panic is
    /// downgraded to `E_CAPTURE_INTERNAL`.
    pub async fn capture(&self, action: CapturedAction) -> CaptureResult {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return CaptureResult::failure(ErrorCode::CaptureSessionClosed, "session is closed");
        }

        if let Err(reason) = action.validate_required_fields() {
            return CaptureResult::failure(ErrorCode::CaptureInvalidAction, reason);
        }

        if self.dedupe.has(&action.id).await {
            return CaptureResult::failure(
                ErrorCode::CaptureDuplicate,
                format!("action '{}' already captured", action.id),
            );
        }

        let threshold = self.truncate_threshold;
        let outcome = AssertUnwindSafe(self.capture_serialised(&action, threshold))
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => result,
            Err(_) => CaptureResult::failure(
                ErrorCode::CaptureInternal,
                "internal panic during capture",
            ),
        }
    }

    /// Steps 4–9: hash, build skeleton, append, record dedupe. Runs under
    /// the store's mutex so `head_digest`/`sequence` promotion is atomic.
    async fn capture_serialised(
        &self,
        action: &CapturedAction,
        threshold: TruncateThreshold,
    ) -> CaptureResult {
        let input_digest = action.input_bytes.as_deref().map(|b| digest(b, threshold));
        let output_digest = action.output_bytes.as_deref().map(|b| digest(b, threshold));

        let mut store = self.store.lock().await;

        let skeleton = EntrySkeleton::for_action(
            action,
            input_digest,
            output_digest,
            store.head_digest(),
            store.sequence(),
        );
        let entry = match skeleton.finish() {
            Ok(entry) => entry,
            Err(e) => {
                return CaptureResult::failure(ErrorCode::CaptureHashFailed, e.message.clone());
            }
        };

        if let Err(e) = store.append(entry.clone()) {
            return CaptureResult::failure(ErrorCode::CaptureStoreFailed, e.to_string());
        }
        drop(store);

        let dedupe_entry = DedupeEntry::new(entry.sequence, entry.entry_digest.clone(), entry.captured_at.clone());
        self.dedupe.set(&action.id, dedupe_entry).await;

        CaptureResult::Success {
            entry: Box::new(entry),
        }
    }

    /// Mark the session closed. Subsequent `capture` calls return
    /// `E_CAPTURE_SESSION_CLOSED` without touching the store or dedupe index.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Commit the underlying store (flush + meta rewrite).
    pub async fn commit(&self) -> Result<(), peac_error::SpoolError> {
        self.store.lock().await.commit()
    }

    /// Direct access to the underlying store, e.g. for diagnostics reads.
    pub fn store(&self) -> Arc<Mutex<SpoolStore>> {
        Arc::clone(&self.store)
    }

    /// Direct access to the underlying dedupe index, e.g. for diagnostics reads.
    pub fn dedupe(&self) -> &Arc<dyn DedupeIndex> {
        &self.dedupe
    }
}
