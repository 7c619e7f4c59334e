//! Typed configuration surfaces for the spool, hasher, and receipt verifier
//! (§6 Environment/configuration for the core).
//!
//! Every type here derives [`schemars::JsonSchema`] so `xtask schema` can
//! emit machine-readable schemas for operators, and every `Default` impl
//! matches the defaults stated in the core's contracts. Fatal misconfigurations
//! (an illegal truncate threshold, an empty spool path) are rejected at
//! construction via [`validate`](SpoolConfig::validate)-style methods that
//! return a [`PeacError`] tagged [`ErrorCode::ConfigInvalid`]; non-fatal
//! issues come back as [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_canon::TruncateThreshold;
use peac_error::{ErrorCode, PeacError};

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory, non-fatal configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// An `issuer_allowlist` entry is not a bare `https://` origin.
    NotABareOrigin {
        /// The offending entry.
        value: String,
    },
    /// A timeout/interval is configured unusually large, which is legal but
    /// likely unintentional.
    UnusuallyLarge {
        /// Field name.
        field: String,
        /// The configured value.
        value: u64,
    },
    /// A trust pin carries no key material, so the verifier will need
    /// network discovery even under `offline_preferred`.
    PinWithoutKeyMaterial {
        /// Issuer the pin is for.
        issuer: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotABareOrigin { value } => {
                write!(f, "issuer_allowlist entry '{value}' is not a bare https origin")
            }
            Self::UnusuallyLarge { field, value } => {
                write!(f, "'{field}' is unusually large ({value})")
            }
            Self::PinWithoutKeyMaterial { issuer } => {
                write!(f, "pin for issuer '{issuer}' carries no key material; discovery will be required")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SpoolConfig (§4.2, §6)
// ---------------------------------------------------------------------------

/// Configuration for a [`peac_spool`](../peac_spool/index.html) instance.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SpoolConfig {
    /// Path to the spool's newline-delimited JCS JSON log file.
    pub file_path: String,
    /// Hard cap on total entries. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    /// Hard cap on the log file's byte size. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_bytes: Option<u64>,
    /// Maximum bytes for a single line, enforced on both write and read.
    pub max_line_bytes: u64,
    /// How often callers should call `commit()` on a timer, in milliseconds.
    /// Advisory only — the store itself has no background task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit_interval_ms: Option<u64>,
    /// If `true`, a lock older than `stale_lock_max_age_ms` may be broken by
    /// `open()` instead of failing with `Lockfile`.
    #[serde(default)]
    pub allow_stale_lock_break: bool,
    /// Age, in milliseconds, after which a lock is considered stale.
    /// Required when `allow_stale_lock_break` is `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_lock_max_age_ms: Option<u64>,
}

impl SpoolConfig {
    /// A config pointing at `file_path` with every other field defaulted.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Validate this config, returning advisory warnings.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ConfigInvalid`] if `file_path` is empty,
    /// `max_line_bytes` is zero, a configured cap is zero, or
    /// `allow_stale_lock_break` is set without `stale_lock_max_age_ms`.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, PeacError> {
        if self.file_path.trim().is_empty() {
            return Err(PeacError::new(ErrorCode::ConfigInvalid, "file_path must not be empty"));
        }
        if self.max_line_bytes == 0 {
            return Err(PeacError::new(ErrorCode::ConfigInvalid, "max_line_bytes must be > 0"));
        }
        if matches!(self.max_entries, Some(0)) {
            return Err(PeacError::new(ErrorCode::ConfigInvalid, "max_entries must be > 0 if set"));
        }
        if matches!(self.max_file_bytes, Some(0)) {
            return Err(PeacError::new(
                ErrorCode::ConfigInvalid,
                "max_file_bytes must be > 0 if set",
            ));
        }
        if self.allow_stale_lock_break && self.stale_lock_max_age_ms.is_none() {
            return Err(PeacError::new(
                ErrorCode::ConfigInvalid,
                "stale_lock_max_age_ms is required when allow_stale_lock_break is set",
            ));
        }

        let mut warnings = Vec::new();
        if let Some(interval) = self.auto_commit_interval_ms
            && interval > 3_600_000
        {
            warnings.push(ConfigWarning::UnusuallyLarge {
                field: "auto_commit_interval_ms".into(),
                value: interval,
            });
        }
        Ok(warnings)
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            max_entries: None,
            max_file_bytes: None,
            // 1 MiB: generous enough for real captures, small enough to
            // bound memory when materialising a single line.
            max_line_bytes: 1024 * 1024,
            auto_commit_interval_ms: Some(5_000),
            allow_stale_lock_break: false,
            stale_lock_max_age_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// HasherConfig (§4.1, §6)
// ---------------------------------------------------------------------------

/// Configuration for the digest helper (§4.1).
///
/// The illegal-threshold case cannot even be represented here: `serde`
/// deserialises straight into [`TruncateThreshold`], so an unrecognised
/// value fails at parse time, not at hash time (per the design note to
/// reject at construction).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HasherConfig {
    /// The truncation threshold applied to `input_bytes`/`output_bytes`.
    pub truncate_threshold: TruncateThreshold,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            truncate_threshold: TruncateThreshold::Mib1,
        }
    }
}

// ---------------------------------------------------------------------------
// VerifierPolicyConfig (§4.6, §6)
// ---------------------------------------------------------------------------

/// Verifier network posture (§4.6, §9 "trust pinning first, discovery second").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifierMode {
    /// Never perform network discovery; a `kid` with no pinned key material fails.
    OfflineOnly,
    /// Try pins first; fall through to network discovery only when a pin is
    /// absent for the issuer. The recommended default posture.
    OfflinePreferred,
    /// Prefer network discovery even when a pin with key material exists.
    NetworkPreferred,
}

impl Default for VerifierMode {
    fn default() -> Self {
        Self::OfflinePreferred
    }
}

/// A pinned trust anchor for one issuer (§4.6 "Trust pinning").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TrustPin {
    /// Issuer this pin applies to (must match `ReceiptClaims.iss`).
    pub issuer: String,
    /// Expected `kid` of the signing key.
    pub kid: String,
    /// RFC 7638 JWK thumbprint the resolved key must match.
    pub jwk_thumbprint_sha256: String,
    /// Inline JWK, if the pin carries key material (enables fully offline verification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<serde_json::Value>,
    /// Raw Ed25519 public key bytes, as an alternative to `jwk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_bytes: Option<Vec<u8>>,
}

impl TrustPin {
    /// Whether this pin carries key material sufficient for fully offline verification.
    pub fn has_key_material(&self) -> bool {
        self.jwk.is_some() || self.public_key_bytes.is_some()
    }
}

/// Resource caps the verifier enforces while parsing receipts and JWKS documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VerifierLimits {
    /// Maximum size, in bytes, of a compact JWS receipt (`limits.receipt_bytes`).
    pub max_receipt_bytes: u64,
    /// Maximum JCS-serialised size, in bytes, of any single `ext` extension.
    pub max_extension_bytes: u64,
    /// Maximum number of keys accepted in a fetched JWKS document.
    pub max_jwks_keys: usize,
    /// Total timeout, in milliseconds, for issuer discovery (§4.6, §5: hard 5s).
    pub discovery_timeout_ms: u64,
}

impl Default for VerifierLimits {
    fn default() -> Self {
        Self {
            max_receipt_bytes: 16 * 1024,
            max_extension_bytes: 4 * 1024,
            max_jwks_keys: 16,
            discovery_timeout_ms: 5_000,
        }
    }
}

/// Top-level verifier policy (§6): network posture, issuer allowlist, trust
/// pins, and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct VerifierPolicyConfig {
    /// Network posture.
    #[serde(default)]
    pub mode: VerifierMode,
    /// Issuer origins (`https://host[:port]`) a receipt's `iss` must normalise into.
    #[serde(default)]
    pub issuer_allowlist: Vec<String>,
    /// Pinned trust anchors, keyed implicitly by `(issuer, kid)`.
    #[serde(default)]
    pub pinned_keys: Vec<TrustPin>,
    /// Resource caps.
    #[serde(default)]
    pub limits: VerifierLimits,
}

impl Default for VerifierPolicyConfig {
    fn default() -> Self {
        Self {
            mode: VerifierMode::default(),
            issuer_allowlist: Vec::new(),
            pinned_keys: Vec::new(),
            limits: VerifierLimits::default(),
        }
    }
}

impl VerifierPolicyConfig {
    /// Find a pin matching both `issuer` and `kid`.
    pub fn find_pin(&self, issuer: &str, kid: &str) -> Option<&TrustPin> {
        self.pinned_keys
            .iter()
            .find(|p| p.issuer == issuer && p.kid == kid)
    }

    /// Validate this policy, returning advisory warnings.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ConfigInvalid`] if any limit is zero, or if
    /// `mode` is `offline_only` while `issuer_allowlist` is non-empty but
    /// no pin carries key material for any allowlisted issuer.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, PeacError> {
        if self.limits.max_receipt_bytes == 0 {
            return Err(PeacError::new(ErrorCode::ConfigInvalid, "max_receipt_bytes must be > 0"));
        }
        if self.limits.max_extension_bytes == 0 {
            return Err(PeacError::new(
                ErrorCode::ConfigInvalid,
                "max_extension_bytes must be > 0",
            ));
        }
        if self.limits.max_jwks_keys == 0 {
            return Err(PeacError::new(ErrorCode::ConfigInvalid, "max_jwks_keys must be > 0"));
        }
        if self.limits.discovery_timeout_ms == 0 {
            return Err(PeacError::new(
                ErrorCode::ConfigInvalid,
                "discovery_timeout_ms must be > 0",
            ));
        }

        let mut warnings = Vec::new();
        for origin in &self.issuer_allowlist {
            if !is_bare_https_origin(origin) {
                warnings.push(ConfigWarning::NotABareOrigin { value: origin.clone() });
            }
        }
        for pin in &self.pinned_keys {
            if !pin.has_key_material() {
                warnings.push(ConfigWarning::PinWithoutKeyMaterial {
                    issuer: pin.issuer.clone(),
                });
            }
        }
        if self.limits.discovery_timeout_ms > 30_000 {
            warnings.push(ConfigWarning::UnusuallyLarge {
                field: "discovery_timeout_ms".into(),
                value: self.limits.discovery_timeout_ms,
            });
        }
        Ok(warnings)
    }
}

/// `https://host` or `https://host:port`, with no path, query, or fragment.
fn is_bare_https_origin(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("https://") else {
        return false;
    };
    !rest.is_empty() && !rest.contains('/') && !rest.contains('?') && !rest.contains('#')
}
