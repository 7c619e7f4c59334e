//! RFC 8785 JSON Canonicalization Scheme (JCS) and truncating SHA-256 digests.
//!
//! [`canonicalize`] turns a [`serde_json::Value`] into its canonical UTF-8
//! byte form: object keys sorted lexicographically by UTF-16 code unit,
//! numbers stringified per the ECMAScript `Number::toString` algorithm, and
//! no whitespace. [`digest`] wraps [`sha256_hex`] with a typed truncation
//! threshold so a caller-supplied transport payload never has to be fully
//! materialised to be hashed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;

use peac_error::{ErrorCode, PeacError};

// ---------------------------------------------------------------------------
// Limits (§4.1 DoS caps)
// ---------------------------------------------------------------------------

/// Traversal caps applied while canonicalising a value.
///
/// Defaults match the evidence validator's defaults: depth 32, array length
/// 10 000, object keys 1 000, string length 65 536, total nodes 100 000.
/// Callers may configure tighter (or looser) caps; the defaults are a
/// ceiling chosen to bound work on untrusted input, not a typical-case
/// expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CanonLimits {
    /// Maximum nesting depth (objects/arrays).
    pub max_depth: usize,
    /// Maximum elements in any single array.
    pub max_array_len: usize,
    /// Maximum keys in any single object.
    pub max_object_keys: usize,
    /// Maximum UTF-8 byte length of any single string.
    pub max_string_len: usize,
    /// Maximum total nodes visited across the whole value.
    pub max_total_nodes: usize,
}

impl Default for CanonLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_array_len: 10_000,
            max_object_keys: 1_000,
            max_string_len: 65_536,
            max_total_nodes: 100_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Canonicalisation failures.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// The value (or a nested part of it) is not JSON-safe: NaN, Infinity,
    /// a non-finite float, or (upstream of this crate, since `serde_json`
    /// cannot represent them at all) a cycle, bigint, symbol, or function.
    #[error("value at '{path}' is not JSON-safe: {reason}")]
    NotJson {
        /// JSON-pointer-ish path to the offending node.
        path: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A configured DoS cap was exceeded during traversal.
    #[error("limit exceeded at '{path}': {limit} (cap {cap})")]
    LimitExceeded {
        /// Path to the node that tripped the cap.
        path: String,
        /// Which limit tripped (`depth`, `array_len`, `object_keys`,
        /// `string_len`, or `total_nodes`).
        limit: &'static str,
        /// The configured cap value.
        cap: usize,
    },
}

impl From<CanonError> for PeacError {
    fn from(err: CanonError) -> Self {
        let code = match &err {
            CanonError::NotJson { .. } => ErrorCode::EvidenceNotJson,
            CanonError::LimitExceeded { .. } => ErrorCode::EvidenceLimitExceeded,
        };
        PeacError::new(code, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Canonicalisation
// ---------------------------------------------------------------------------

/// Canonicalise `value` into its JCS byte form using [`CanonLimits::default`].
pub fn canonicalize(value: &Value) -> Result<String, CanonError> {
    canonicalize_with_limits(value, &CanonLimits::default())
}

/// Canonicalise `value` into its JCS byte form under explicit `limits`.
pub fn canonicalize_with_limits(value: &Value, limits: &CanonLimits) -> Result<String, CanonError> {
    let mut out = String::new();
    let mut nodes = 0usize;
    write_value(value, 0, "$", limits, &mut nodes, &mut out)?;
    Ok(out)
}

fn write_value(
    value: &Value,
    depth: usize,
    path: &str,
    limits: &CanonLimits,
    nodes: &mut usize,
    out: &mut String,
) -> Result<(), CanonError> {
    *nodes += 1;
    if *nodes > limits.max_total_nodes {
        return Err(CanonError::LimitExceeded {
            path: path.to_string(),
            limit: "total_nodes",
            cap: limits.max_total_nodes,
        });
    }
    if depth > limits.max_depth {
        return Err(CanonError::LimitExceeded {
            path: path.to_string(),
            limit: "depth",
            cap: limits.max_depth,
        });
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n, path)?),
        Value::String(s) => {
            if s.len() > limits.max_string_len {
                return Err(CanonError::LimitExceeded {
                    path: path.to_string(),
                    limit: "string_len",
                    cap: limits.max_string_len,
                });
            }
            write_json_string(s, out);
        }
        Value::Array(items) => {
            if items.len() > limits.max_array_len {
                return Err(CanonError::LimitExceeded {
                    path: path.to_string(),
                    limit: "array_len",
                    cap: limits.max_array_len,
                });
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let child_path = format!("{path}[{i}]");
                write_value(item, depth + 1, &child_path, limits, nodes, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            if map.len() > limits.max_object_keys {
                return Err(CanonError::LimitExceeded {
                    path: path.to_string(),
                    limit: "object_keys",
                    cap: limits.max_object_keys,
                });
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| utf16_units(a).cmp(&utf16_units(b)));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                let child_path = format!("{path}.{key}");
                write_value(&map[*key], depth + 1, &child_path, limits, nodes, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn utf16_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Escape and quote a string per RFC 8785 §3.2.2.2 (equivalent to
/// `JSON.stringify` for strings: mandatory escapes plus `\b \f \n \r \t`,
/// everything else emitted as-is since `serde_json::Value` strings are
/// already valid UTF-8).
fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn canonical_number(n: &serde_json::Number, path: &str) -> Result<String, CanonError> {
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    let f = n.as_f64().ok_or_else(|| CanonError::NotJson {
        path: path.to_string(),
        reason: "number has no finite representation".to_string(),
    })?;
    if f.is_nan() || f.is_infinite() {
        return Err(CanonError::NotJson {
            path: path.to_string(),
            reason: "NaN and Infinity are not JSON-safe".to_string(),
        });
    }
    Ok(format_es_number(f))
}

/// Approximate the ECMAScript `Number::toString` algorithm (RFC 8785
/// §3.2.2.3): fixed notation for `1e-6 <= |x| < 1e21`, exponential
/// notation outside that range, `-0` collapsed to `"0"`.
fn format_es_number(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let abs = f.abs();
    if abs >= 1e21 || abs < 1e-6 {
        format_es_exponential(f)
    } else {
        format!("{f}")
    }
}

fn format_es_exponential(f: f64) -> String {
    let s = format!("{f:e}");
    match s.find('e') {
        Some(epos) => {
            let (mantissa, exp) = s.split_at(epos);
            let exp_digits = &exp[1..];
            if let Some(stripped) = exp_digits.strip_prefix('-') {
                format!("{mantissa}e-{stripped}")
            } else {
                format!("{mantissa}e+{exp_digits}")
            }
        }
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Digests (§4.1, §3 Digest)
// ---------------------------------------------------------------------------

/// The only two legal truncation thresholds. Constructing a `Digest` with
/// any other threshold is a compile-time impossibility rather than a
/// hash-time error (per the design note to reject illegal thresholds at
/// construction, not at hash time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TruncateThreshold {
    /// 64 KiB.
    Kib64,
    /// 1 MiB.
    Mib1,
}

impl TruncateThreshold {
    /// The threshold in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Kib64 => 64 * 1024,
            Self::Mib1 => 1024 * 1024,
        }
    }

    fn alg_tag(self) -> &'static str {
        match self {
            Self::Kib64 => "sha-256:trunc-64k",
            Self::Mib1 => "sha-256:trunc-1m",
        }
    }
}

/// Digest algorithm tag, matching the three legal `Digest.alg` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DigestAlg {
    /// Full-payload SHA-256.
    #[serde(rename = "sha-256")]
    Sha256,
    /// SHA-256 of the first 64 KiB.
    #[serde(rename = "sha-256:trunc-64k")]
    Sha256Trunc64k,
    /// SHA-256 of the first 1 MiB.
    #[serde(rename = "sha-256:trunc-1m")]
    Sha256Trunc1m,
}

impl fmt::Display for DigestAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sha256 => "sha-256",
            Self::Sha256Trunc64k => "sha-256:trunc-64k",
            Self::Sha256Trunc1m => "sha-256:trunc-1m",
        };
        f.write_str(s)
    }
}

/// `{alg, value, bytes}` triple (§3 Digest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Digest {
    /// Algorithm tag.
    pub alg: DigestAlg,
    /// 64 lowercase hex chars.
    pub value: String,
    /// Original payload length, even when truncated.
    pub bytes: u64,
}

/// Hex-encode the SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Digest `payload`, truncating to `threshold` if the payload exceeds it.
///
/// `bytes` in the result always records the *original* payload length, even
/// when the hash itself only covers the first `threshold.bytes()` bytes.
pub fn digest(payload: &[u8], threshold: TruncateThreshold) -> Digest {
    let original_len = payload.len() as u64;
    let cap = threshold.bytes();
    if payload.len() <= cap {
        Digest {
            alg: DigestAlg::Sha256,
            value: sha256_hex(payload),
            bytes: original_len,
        }
    } else {
        let alg = match threshold {
            TruncateThreshold::Kib64 => DigestAlg::Sha256Trunc64k,
            TruncateThreshold::Mib1 => DigestAlg::Sha256Trunc1m,
        };
        debug_assert_eq!(alg.to_string(), threshold.alg_tag());
        Digest {
            alg,
            value: sha256_hex(&payload[..cap]),
            bytes: original_len,
        }
    }
}
