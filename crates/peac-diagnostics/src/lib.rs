//! Read-only operational state surface for collaborators (§2).
//!
//! Diagnostics is orthogonal: it owns nothing. Every snapshot here is
//! derived fresh from a live [`peac_spool::SpoolStore`],
//! [`peac_capture::DedupeIndex`], or [`peac_capture::CaptureSession`] at the
//! moment it's requested, and carries no handle back to mutate the source.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod report;
pub mod spool;

pub use capture::{CaptureSnapshot, DedupeSnapshot, capture_snapshot, dedupe_snapshot};
pub use report::{OperationalReport, collect};
pub use spool::{SpoolHealth, SpoolSnapshot, spool_snapshot};
