//! Unified error taxonomy with stable error codes for the capture-and-receipt core.
//!
//! Every error surfaced by this workspace carries an [`ErrorCode`] (a
//! machine-readable, stable string tag), a human-readable message, an
//! optional cause chain, and arbitrary key-value context. Use the builder
//! returned by [`PeacError::new`] to construct errors fluently.
//!
//! The spool layer has its own typed [`SpoolError`] rather than routing
//! through [`PeacError`]: its three variants (`Full`, `Corrupt`, `Lockfile`)
//! are meant to propagate unchanged to callers that talk to the spool
//! directly, and only get flattened into a capture-layer [`ErrorCode`] at
//! the `capture()` boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Capture-session pipeline errors.
    Capture,
    /// Spool store errors (translated from [`SpoolError`] at the capture boundary).
    Spool,
    /// Canonical JSON / digesting errors.
    Canon,
    /// Receipt issuance and verification errors.
    Receipt,
    /// Policy document / evaluation errors.
    Policy,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Capture => "capture",
            Self::Spool => "spool",
            Self::Canon => "canon",
            Self::Receipt => "receipt",
            Self::Policy => "policy",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string matching the
/// `E_CAPTURE_*` / `E_VERIFY_*` naming convention named by the core's
/// contracts; the string form is guaranteed not to change across patch
/// releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Capture session (§4.4) --
    /// Required field missing or empty on the captured action.
    CaptureInvalidAction,
    /// `action.id` already present in the dedupe index.
    CaptureDuplicate,
    /// Hashing `input_bytes`/`output_bytes` failed.
    CaptureHashFailed,
    /// The spool store rejected the append (full, corrupt, or I/O failure).
    CaptureStoreFailed,
    /// `capture()` was called after the session was closed.
    CaptureSessionClosed,
    /// An unexpected panic was caught inside the serialised pipeline.
    CaptureInternal,

    // -- Canonical JSON / digest (§4.1) --
    /// Value is not JSON-safe (NaN, Infinity, cycle, bigint, symbol, function).
    EvidenceNotJson,
    /// A configured DoS cap (depth, array length, object keys, string
    /// length, or total node count) was exceeded during canonicalisation.
    EvidenceLimitExceeded,

    // -- Receipt verifier reason codes (§4.6) --
    /// `jws.parse` failed: not three base64url segments, or not JSON.
    VerifyMalformedReceipt,
    /// `limits.receipt_bytes` failed: receipt exceeds `max_receipt_bytes`.
    VerifyReceiptTooLarge,
    /// `claims.schema_unverified` failed: claims do not match the structural schema.
    VerifySchemaInvalid,
    /// `issuer.trust_policy` failed: issuer origin not in the allowlist.
    VerifyIssuerNotAllowed,
    /// `key.resolve` failed: `kid` absent from the resolved JWKS.
    VerifyKeyNotFound,
    /// `key.resolve` failed: JWK thumbprint mismatched a configured pin.
    VerifyPolicyViolation,
    /// `jws.signature` failed: Ed25519 verification did not pass.
    VerifySignatureInvalid,
    /// `claims.time_window` failed: `iat` is more than 60s in the future.
    VerifyNotYetValid,
    /// `claims.time_window` failed: `exp` is in the past.
    VerifyExpired,
    /// `extensions.limits` failed: an extension's JCS form exceeds the cap.
    VerifyExtensionTooLarge,
    /// A network fetch during `issuer.discovery` was refused (SSRF guard).
    VerifyNetworkBlocked,
    /// A network fetch during `issuer.discovery` failed or timed out.
    VerifyNetworkError,

    // -- Receipt issuer --
    /// Claims failed issuer-side validation (issuer/audience scheme,
    /// currency code, amount sign, `exp`/`iat` ordering, extension size).
    ReceiptInvalidClaims,

    // -- Policy --
    /// The policy document itself is malformed (bad rule, unknown profile).
    PolicyInvalid,

    // -- Config --
    /// A configuration value is invalid (e.g. an illegal truncate threshold).
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CaptureInvalidAction
            | Self::CaptureDuplicate
            | Self::CaptureHashFailed
            | Self::CaptureStoreFailed
            | Self::CaptureSessionClosed
            | Self::CaptureInternal => ErrorCategory::Capture,

            Self::EvidenceNotJson | Self::EvidenceLimitExceeded => ErrorCategory::Canon,

            Self::VerifyMalformedReceipt
            | Self::VerifyReceiptTooLarge
            | Self::VerifySchemaInvalid
            | Self::VerifyIssuerNotAllowed
            | Self::VerifyKeyNotFound
            | Self::VerifyPolicyViolation
            | Self::VerifySignatureInvalid
            | Self::VerifyNotYetValid
            | Self::VerifyExpired
            | Self::VerifyExtensionTooLarge
            | Self::VerifyNetworkBlocked
            | Self::VerifyNetworkError
            | Self::ReceiptInvalidClaims => ErrorCategory::Receipt,

            Self::PolicyInvalid => ErrorCategory::Policy,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"CAPTURE_DUPLICATE"`), matching the `E_CAPTURE_*`/`E_VERIFY_*`
    /// identifiers named in the core's contracts (the `E_` prefix is added
    /// by [`ErrorCode::wire_code`] for callers that want the exact string).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaptureInvalidAction => "CAPTURE_INVALID_ACTION",
            Self::CaptureDuplicate => "CAPTURE_DUPLICATE",
            Self::CaptureHashFailed => "CAPTURE_HASH_FAILED",
            Self::CaptureStoreFailed => "CAPTURE_STORE_FAILED",
            Self::CaptureSessionClosed => "CAPTURE_SESSION_CLOSED",
            Self::CaptureInternal => "CAPTURE_INTERNAL",
            Self::EvidenceNotJson => "EVIDENCE_NOT_JSON",
            Self::EvidenceLimitExceeded => "EVIDENCE_LIMIT_EXCEEDED",
            Self::VerifyMalformedReceipt => "VERIFY_MALFORMED_RECEIPT",
            Self::VerifyReceiptTooLarge => "VERIFY_RECEIPT_TOO_LARGE",
            Self::VerifySchemaInvalid => "VERIFY_SCHEMA_INVALID",
            Self::VerifyIssuerNotAllowed => "VERIFY_ISSUER_NOT_ALLOWED",
            Self::VerifyKeyNotFound => "VERIFY_KEY_NOT_FOUND",
            Self::VerifyPolicyViolation => "VERIFY_POLICY_VIOLATION",
            Self::VerifySignatureInvalid => "VERIFY_SIGNATURE_INVALID",
            Self::VerifyNotYetValid => "VERIFY_NOT_YET_VALID",
            Self::VerifyExpired => "VERIFY_EXPIRED",
            Self::VerifyExtensionTooLarge => "VERIFY_EXTENSION_TOO_LARGE",
            Self::VerifyNetworkBlocked => "VERIFY_NETWORK_BLOCKED",
            Self::VerifyNetworkError => "VERIFY_NETWORK_ERROR",
            Self::ReceiptInvalidClaims => "RECEIPT_INVALID_CLAIMS",
            Self::PolicyInvalid => "POLICY_INVALID",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// The `E_`-prefixed wire form used in capture/verify contracts, e.g.
    /// `"E_CAPTURE_DUPLICATE"`.
    pub fn wire_code(&self) -> String {
        format!("E_{}", self.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PeacError
// ---------------------------------------------------------------------------

/// Unified error for everything outside the spool's own typed errors.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use peac_error::{PeacError, ErrorCode};
///
/// let err = PeacError::new(ErrorCode::ReceiptInvalidClaims, "amt must be non-negative")
///     .with_context("amt", -5);
/// ```
pub struct PeacError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PeacError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if
    /// serialisation fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for PeacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PeacError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PeacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PeacError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serialisable snapshot of a [`PeacError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeacErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&PeacError> for PeacErrorDto {
    fn from(err: &PeacError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Spool layer errors (§4.2, §7) — kept distinct from PeacError on purpose
// ---------------------------------------------------------------------------

/// The resource unit that tripped a hard spool cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpoolCapUnit {
    /// `maxEntries` was exceeded.
    Entries,
    /// `maxFileBytes` was exceeded.
    Bytes,
}

impl fmt::Display for SpoolCapUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entries => f.write_str("entries"),
            Self::Bytes => f.write_str("bytes"),
        }
    }
}

/// Why a spool was marked corrupt and moved to `ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorruptReason {
    /// `entry_digest`/`prev_entry_digest` linkage did not hold.
    ChainBroken,
    /// A line failed to parse as JSON.
    MalformedJson,
    /// A line exceeded `maxLineBytes` and was not materialised.
    LineTooLarge,
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChainBroken => "CHAIN_BROKEN",
            Self::MalformedJson => "MALFORMED_JSON",
            Self::LineTooLarge => "LINE_TOO_LARGE",
        };
        f.write_str(s)
    }
}

/// Errors raised directly by the spool store (§4.2, §7).
///
/// These propagate unchanged to callers that talk to the spool directly;
/// the capture session translates all three into
/// [`ErrorCode::CaptureStoreFailed`] at its own boundary.
#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    /// A hard cap (`maxEntries` or `maxFileBytes`) was exceeded. The store
    /// moves to `ReadOnly`; this is back-pressure, not a crash.
    #[error("spool full: {current}/{max} {unit}")]
    Full {
        /// Current usage at the time of the trip.
        current: u64,
        /// The configured cap.
        max: u64,
        /// Which resource tripped.
        unit: SpoolCapUnit,
    },

    /// The spool was found (or became) corrupt and is now read-only.
    #[error("spool corrupt: {reason}{}", .corrupt_at_sequence.map(|s| format!(" at sequence {s}")).unwrap_or_default())]
    Corrupt {
        /// Category of corruption.
        reason: CorruptReason,
        /// Sequence number of the first offending entry, if known.
        corrupt_at_sequence: Option<u64>,
        /// Free-form diagnostic detail.
        details: Option<String>,
    },

    /// The exclusive lockfile could not be acquired.
    #[error("lockfile held: {lock_path}{}", .holder_pid.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    Lockfile {
        /// Path to the `.lock` sidecar.
        lock_path: String,
        /// PID recorded in the existing lock payload, if parseable.
        holder_pid: Option<u32>,
    },

    /// Underlying I/O failure (OS errors propagate unchanged per §7).
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spool line could not be parsed as JSON even though it was short
    /// enough to materialise (distinct from [`SpoolError::Corrupt`], which
    /// is the persistent, recorded state of the store after such a line is
    /// discovered).
    #[error("spool JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpoolError {
    /// Category for diagnostics purposes; always [`ErrorCategory::Spool`]
    /// except for bare I/O/JSON errors, which are [`ErrorCategory::Internal`]
    /// until classified by the caller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Full { .. } | Self::Corrupt { .. } | Self::Lockfile { .. } => {
                ErrorCategory::Spool
            }
            Self::Io(_) | Self::Json(_) => ErrorCategory::Internal,
        }
    }
}
