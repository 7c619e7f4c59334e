//! Minimal JWK handling: Ed25519 (`OKP`/`Ed25519`) keys and RFC 7638
//! thumbprints (§4.6 "key.resolve").

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use peac_error::{ErrorCode, PeacError};

/// An Ed25519 public key in JWK form (RFC 8037 `OKP`/`Ed25519`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Jwk {
    /// Key type; must be `"OKP"` for Ed25519.
    pub kty: String,
    /// Curve; must be `"Ed25519"`.
    pub crv: String,
    /// Base64url, unpadded public key bytes.
    pub x: String,
    /// Key identifier.
    pub kid: String,
    /// Intended use; must be `"sig"`.
    #[serde(rename = "use")]
    pub use_: String,
    /// Permitted operations; must include `"verify"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
}

impl Jwk {
    /// Build a JWK from a verifying key and `kid`.
    pub fn from_verifying_key(key: &VerifyingKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
            kid: kid.into(),
            use_: "sig".to_string(),
            key_ops: vec!["verify".to_string()],
        }
    }

    /// Whether `use`/`key_ops` permit signature verification (§4.6 check 7).
    pub fn permits_verify(&self) -> bool {
        self.use_ == "sig" && self.key_ops.iter().any(|op| op == "verify")
    }

    /// Whether this key's type/curve is one this verifier supports.
    pub fn is_supported_key_type(&self) -> bool {
        self.kty == "OKP" && self.crv == "Ed25519"
    }

    /// Decode the public key bytes and construct a [`VerifyingKey`].
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, PeacError> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(PeacError::new(
                ErrorCode::VerifyPolicyViolation,
                format!("unsupported key type/curve: {}/{}", self.kty, self.crv),
            ));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|e| PeacError::new(ErrorCode::VerifyKeyNotFound, e.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PeacError::new(ErrorCode::VerifyKeyNotFound, "jwk.x is not 32 bytes"))?;
        VerifyingKey::from_bytes(&array)
            .map_err(|e| PeacError::new(ErrorCode::VerifyKeyNotFound, e.to_string()))
    }

    /// RFC 7638 JSON Web Key thumbprint: SHA-256 over the JCS-style
    /// lexicographically-ordered required members `{crv, kty, x}`, then
    /// base64url-unpadded.
    pub fn thumbprint_sha256(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}"}}"#,
            self.crv, self.kty, self.x
        );
        let digest = Sha256::digest(canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// A JSON Web Key Set, as fetched from an issuer's discovery document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find the key matching `kid`.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn key() -> (SigningKey, VerifyingKey) {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let verifying = signing.verifying_key();
        (signing, verifying)
    }

    #[test]
    fn roundtrips_through_jwk() {
        let (_, verifying) = key();
        let jwk = Jwk::from_verifying_key(&verifying, "k1");
        let back = jwk.to_verifying_key().unwrap();
        assert_eq!(back.as_bytes(), verifying.as_bytes());
    }

    #[test]
    fn thumbprint_is_deterministic() {
        let (_, verifying) = key();
        let jwk1 = Jwk::from_verifying_key(&verifying, "k1");
        let jwk2 = Jwk::from_verifying_key(&verifying, "k2");
        // kid is not part of the RFC 7638 required members, so thumbprints
        // over the same key material are identical regardless of kid.
        assert_eq!(jwk1.thumbprint_sha256(), jwk2.thumbprint_sha256());
    }

    #[test]
    fn different_keys_have_different_thumbprints() {
        let signing_a = SigningKey::from_bytes(&[1u8; 32]);
        let signing_b = SigningKey::from_bytes(&[2u8; 32]);
        let jwk_a = Jwk::from_verifying_key(&signing_a.verifying_key(), "a");
        let jwk_b = Jwk::from_verifying_key(&signing_b.verifying_key(), "b");
        assert_ne!(jwk_a.thumbprint_sha256(), jwk_b.thumbprint_sha256());
    }

    #[test]
    fn unsupported_kty_rejected() {
        let mut jwk = Jwk::from_verifying_key(&key().1, "k1");
        jwk.kty = "RSA".to_string();
        assert!(jwk.to_verifying_key().is_err());
        assert!(!jwk.is_supported_key_type());
    }

    #[test]
    fn permits_verify_requires_sig_use_and_verify_op() {
        let jwk = Jwk::from_verifying_key(&key().1, "k1");
        assert!(jwk.permits_verify());

        let mut enc = jwk.clone();
        enc.use_ = "enc".to_string();
        assert!(!enc.permits_verify());

        let mut no_ops = jwk.clone();
        no_ops.key_ops = Vec::new();
        assert!(!no_ops.permits_verify());

        let mut wrong_op = jwk;
        wrong_op.key_ops = vec!["sign".to_string()];
        assert!(!wrong_op.permits_verify());
    }
}
