//! Compact JWS encode/decode over JCS-canonicalised payloads (§4.5, §4.6).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use peac_canon::canonicalize;
use peac_error::{ErrorCode, PeacError};

/// `peac.receipt` wire version embedded in the protected header's `typ`.
pub const RECEIPT_WIRE_VERSION: &str = "v1";

/// Protected header of a receipt's compact JWS (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtectedHeader {
    /// Signature algorithm; must be `"EdDSA"`.
    pub alg: String,
    /// Type, e.g. `"peac.receipt/v1"`.
    pub typ: String,
    /// Key id of the signing key.
    pub kid: String,
    /// Extensions the verifier must understand to process this receipt, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crit: Vec<String>,
}

impl ProtectedHeader {
    /// A fresh header for the current wire version, no `crit` extensions.
    pub fn new(kid: impl Into<String>) -> Self {
        Self {
            alg: "EdDSA".to_string(),
            typ: format!("peac.receipt/{RECEIPT_WIRE_VERSION}"),
            kid: kid.into(),
            crit: Vec::new(),
        }
    }
}

/// A parsed (not yet verified) compact JWS.
pub struct ParsedJws {
    /// The protected header.
    pub header: ProtectedHeader,
    /// The claims payload, still as a raw JSON value.
    pub payload: serde_json::Value,
    /// The raw signature bytes.
    pub signature: Vec<u8>,
    /// The ASCII `header.payload` signing input the signature covers.
    pub signing_input: Vec<u8>,
}

/// Sign `claims` (already JCS-serialisable) into a compact JWS.
pub fn encode_compact<T: Serialize>(
    claims: &T,
    signing_key: &SigningKey,
    kid: &str,
) -> Result<String, PeacError> {
    let header = ProtectedHeader::new(kid);
    let header_json = serde_json::to_string(&header)
        .map_err(|e| PeacError::new(ErrorCode::ReceiptInvalidClaims, e.to_string()))?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json.as_bytes());

    let claims_value = serde_json::to_value(claims)
        .map_err(|e| PeacError::new(ErrorCode::ReceiptInvalidClaims, e.to_string()))?;
    let payload_jcs = canonicalize(&claims_value).map_err(PeacError::from)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_jcs.as_bytes());

    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Parse a compact JWS into its three segments (§4.6 check 1, `jws.parse`).
/// Does not verify the signature.
pub fn parse_compact(jws: &str) -> Result<ParsedJws, PeacError> {
    let parts: Vec<&str> = jws.split('.').collect();
    if parts.len() != 3 {
        return Err(PeacError::new(
            ErrorCode::VerifyMalformedReceipt,
            "compact JWS must have exactly three segments",
        ));
    }
    let [header_b64, payload_b64, signature_b64] = [parts[0], parts[1], parts[2]];

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| PeacError::new(ErrorCode::VerifyMalformedReceipt, e.to_string()))?;
    let header: ProtectedHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| PeacError::new(ErrorCode::VerifyMalformedReceipt, e.to_string()))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| PeacError::new(ErrorCode::VerifyMalformedReceipt, e.to_string()))?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| PeacError::new(ErrorCode::VerifyMalformedReceipt, e.to_string()))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| PeacError::new(ErrorCode::VerifyMalformedReceipt, e.to_string()))?;

    let signing_input = format!("{header_b64}.{payload_b64}").into_bytes();

    Ok(ParsedJws {
        header,
        payload,
        signature,
        signing_input,
    })
}

/// Verify `parsed`'s signature against `key` (§4.6 check 8, `jws.signature`).
pub fn verify_signature(parsed: &ParsedJws, key: &VerifyingKey) -> Result<(), PeacError> {
    let array: [u8; 64] = parsed
        .signature
        .clone()
        .try_into()
        .map_err(|_| PeacError::new(ErrorCode::VerifySignatureInvalid, "signature is not 64 bytes"))?;
    let signature = Signature::from_bytes(&array);
    key.verify(&parsed.signing_input, &signature)
        .map_err(|e| PeacError::new(ErrorCode::VerifySignatureInvalid, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize as _;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[test]
    fn encode_then_parse_roundtrips() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let claims = Sample { a: 1, b: "x".into() };
        let jws = encode_compact(&claims, &signing, "k1").unwrap();
        let parsed = parse_compact(&jws).unwrap();
        assert_eq!(parsed.header.alg, "EdDSA");
        assert_eq!(parsed.header.kid, "k1");
        assert_eq!(parsed.payload, serde_json::to_value(&claims).unwrap());
    }

    #[test]
    fn verify_signature_succeeds_with_matching_key() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let verifying = signing.verifying_key();
        let claims = Sample { a: 1, b: "x".into() };
        let jws = encode_compact(&claims, &signing, "k1").unwrap();
        let parsed = parse_compact(&jws).unwrap();
        assert!(verify_signature(&parsed, &verifying).is_ok());
    }

    #[test]
    fn verify_signature_fails_with_wrong_key() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let other = SigningKey::from_bytes(&[9u8; 32]).verifying_key();
        let claims = Sample { a: 1, b: "x".into() };
        let jws = encode_compact(&claims, &signing, "k1").unwrap();
        let parsed = parse_compact(&jws).unwrap();
        assert!(verify_signature(&parsed, &other).is_err());
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let verifying = signing.verifying_key();
        let claims = Sample { a: 1, b: "x".into() };
        let jws = encode_compact(&claims, &signing, "k1").unwrap();
        let mut segments: Vec<&str> = jws.split('.').collect();
        let tampered_payload = URL_SAFE_NO_PAD.encode(br#"{"a":999,"b":"x"}"#);
        segments[1] = &tampered_payload;
        let tampered = segments.join(".");
        let parsed = parse_compact(&tampered).unwrap();
        assert!(verify_signature(&parsed, &verifying).is_err());
    }

    #[test]
    fn malformed_segment_count_rejected() {
        assert!(parse_compact("only.two").is_err());
    }

    #[test]
    fn non_base64_segment_rejected() {
        assert!(parse_compact("not base64!.also not.signature").is_err());
    }
}
