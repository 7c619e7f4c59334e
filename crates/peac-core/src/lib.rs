//! Core data model and chain invariants for the capture-and-receipt core (§3).
//!
//! This crate is deliberately inert: it defines [`CapturedAction`], the
//! persisted [`SpoolEntry`] and [`DedupeEntry`] shapes, and the pure chain
//! invariants that bind one entry to the next. It does no I/O and owns no
//! state — the spool store (`peac-spool`) and capture session
//! (`peac-capture`) are the crates that actually mutate anything.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod dedupe;
pub mod entry;

pub use action::{ActionStatus, CapturedAction, PolicySnapshot, StrippedAction};
pub use dedupe::DedupeEntry;
pub use entry::{EntrySkeleton, SpoolEntry, genesis_digest};
