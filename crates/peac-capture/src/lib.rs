//! Capture session: binds [`peac_core::CapturedAction`] to the append-only
//! spool, serialising the pipeline and guaranteeing it never throws (§4.4).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod dedupe;
pub mod session;

pub use dedupe::{DedupeIndex, InMemoryDedupeIndex};
pub use session::{CaptureResult, CaptureSession};
