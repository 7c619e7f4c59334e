//! Receipt issuer (§4.5): assembles and signs [`ReceiptClaims`].

use ed25519_dalek::SigningKey;
use uuid::Uuid;

use peac_error::PeacError;

use crate::claims::{ClaimsInput, ReceiptClaims};
use crate::jws::encode_compact;

/// The product of a successful issuance: the compact JWS and the structural
/// claims it carries (§4.5 "Output: the JWS string and the structural claims").
#[derive(Debug, Clone)]
pub struct IssuedReceipt {
    /// The signed compact JWS.
    pub jws: String,
    /// The claims that were signed.
    pub claims: ReceiptClaims,
}

/// Assemble, validate, and sign `input` into an [`IssuedReceipt`].
///
/// `now_unix_seconds` is supplied by the caller rather than read from the
/// wall clock internally, keeping this function a pure (and therefore
/// trivially testable) transform of its inputs.
pub fn issue(
    input: ClaimsInput,
    signing_key: &SigningKey,
    kid: &str,
    now_unix_seconds: i64,
    max_extension_bytes: u64,
) -> Result<IssuedReceipt, PeacError> {
    let claims = ReceiptClaims {
        iss: input.iss,
        aud: input.aud,
        rid: Uuid::now_v7().to_string(),
        iat: now_unix_seconds,
        exp: input.exp,
        amt: input.amt,
        cur: input.cur,
        payment: input.payment,
        subject_snapshot: input.subject_snapshot,
        ext: input.ext,
    };
    claims.validate(max_extension_bytes)?;

    let jws = encode_compact(&claims, signing_key, kid)?;
    Ok(IssuedReceipt { jws, claims })
}
