//! Deterministic receipt issuance and verification (§4.5, §4.6).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod discovery;
pub mod issuer;
pub mod jwk;
pub mod jws;
pub mod verifier;

pub use claims::{ClaimsInput, PaymentEnv, PaymentEvidence, ReceiptClaims};
pub use discovery::{JwksCache, discover_jwks};
pub use issuer::{IssuedReceipt, issue};
pub use jwk::{Jwk, Jwks};
pub use jws::{ProtectedHeader, RECEIPT_WIRE_VERSION, encode_compact, parse_compact, verify_signature};
pub use verifier::{
    CHECK_ORDER, CheckId, CheckResult, CheckStatus, REASON_OK, REASON_SHORT_CIRCUIT, VerifyReport, verify,
};
