//! `ReceiptClaims` (§3, §4.5): the signed payload of a receipt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use peac_canon::canonicalize;
use peac_error::{ErrorCode, PeacError};

/// Rail-specific payment evidence carried in a receipt (§3 ReceiptClaims).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PaymentEvidence {
    /// Payment rail identifier, e.g. `"x402"`.
    pub rail: String,
    /// Rail-specific payment reference.
    pub reference: String,
    /// Amount in minor units, matching `ReceiptClaims.amt`.
    pub amount: u64,
    /// ISO 4217 currency code, matching `ReceiptClaims.cur`.
    pub currency: String,
    /// Settlement asset, e.g. `"USDC"`.
    pub asset: String,
    /// Environment the payment was made in.
    pub env: PaymentEnv,
    /// Free-form rail-specific evidence sub-object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
}

/// Environment a [`PaymentEvidence`] was recorded in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEnv {
    /// Real-money settlement.
    Live,
    /// Test/sandbox settlement.
    Test,
}

/// The signed claims of a receipt (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReceiptClaims {
    /// Issuer, an `https://` origin.
    pub iss: String,
    /// Audience, an `https://` origin.
    pub aud: String,
    /// Receipt id: a fresh UUIDv7, unique per issuance.
    pub rid: String,
    /// Issued-at, in seconds since the epoch.
    pub iat: i64,
    /// Expiry, in seconds since the epoch, if the receipt is time-bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Amount in minor units (non-negative).
    pub amt: u64,
    /// ISO 4217 currency code, uppercase.
    pub cur: String,
    /// Payment evidence backing this receipt.
    pub payment: PaymentEvidence,
    /// Optional snapshot of the subject the receipt concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_snapshot: Option<serde_json::Value>,
    /// Namespaced extensions, each individually size-bounded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, serde_json::Value>,
}

/// Everything the caller supplies to mint a [`ReceiptClaims`]; `rid` and
/// `iat` are generated by the issuer, never supplied by the caller (§4.5).
#[derive(Debug, Clone)]
pub struct ClaimsInput {
    /// See [`ReceiptClaims::iss`].
    pub iss: String,
    /// See [`ReceiptClaims::aud`].
    pub aud: String,
    /// See [`ReceiptClaims::exp`].
    pub exp: Option<i64>,
    /// See [`ReceiptClaims::amt`].
    pub amt: u64,
    /// See [`ReceiptClaims::cur`].
    pub cur: String,
    /// See [`ReceiptClaims::payment`].
    pub payment: PaymentEvidence,
    /// See [`ReceiptClaims::subject_snapshot`].
    pub subject_snapshot: Option<serde_json::Value>,
    /// See [`ReceiptClaims::ext`].
    pub ext: BTreeMap<String, serde_json::Value>,
}

fn is_https_origin_like(value: &str) -> bool {
    value.starts_with("https://")
}

fn is_iso4217_like(value: &str) -> bool {
    value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase())
}

impl ReceiptClaims {
    /// Validate the claims against §4.5's structural rules. Extension size
    /// is checked against `max_extension_bytes`; everything else is
    /// self-contained to the claims.
    pub fn validate(&self, max_extension_bytes: u64) -> Result<(), PeacError> {
        if !is_https_origin_like(&self.iss) {
            return Err(PeacError::new(
                ErrorCode::ReceiptInvalidClaims,
                "iss must start with https://",
            ));
        }
        if !is_https_origin_like(&self.aud) {
            return Err(PeacError::new(
                ErrorCode::ReceiptInvalidClaims,
                "aud must start with https://",
            ));
        }
        if !is_iso4217_like(&self.cur) {
            return Err(PeacError::new(
                ErrorCode::ReceiptInvalidClaims,
                "cur must match ^[A-Z]{3}$",
            ));
        }
        if let Some(exp) = self.exp {
            if exp <= self.iat {
                return Err(PeacError::new(
                    ErrorCode::ReceiptInvalidClaims,
                    "exp must be greater than iat",
                ));
            }
        }
        for (name, value) in &self.ext {
            let json = canonicalize(value).map_err(PeacError::from)?;
            if json.len() as u64 > max_extension_bytes {
                return Err(PeacError::new(
                    ErrorCode::ReceiptInvalidClaims,
                    format!("extension '{name}' exceeds max_extension_bytes"),
                ));
            }
        }
        Ok(())
    }
}
