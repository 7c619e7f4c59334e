//! Receipt verifier (§4.6): a fixed-order, shape-stable ten-check pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_canon::canonicalize;
use peac_config::{VerifierMode, VerifierPolicyConfig};
use peac_error::PeacError;

use crate::claims::ReceiptClaims;
use crate::discovery::{JwksCache, discover_jwks};
use crate::jwk::Jwk;
use crate::jws::{ParsedJws, parse_compact, verify_signature};

/// The ten named checks, in the fixed order §4.6 mandates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    /// `jws.parse`
    JwsParse,
    /// `limits.receipt_bytes`
    LimitsReceiptBytes,
    /// `jws.protected_header`
    JwsProtectedHeader,
    /// `claims.schema_unverified`
    ClaimsSchemaUnverified,
    /// `issuer.trust_policy`
    IssuerTrustPolicy,
    /// `issuer.discovery`
    IssuerDiscovery,
    /// `key.resolve`
    KeyResolve,
    /// `jws.signature`
    JwsSignature,
    /// `claims.time_window`
    ClaimsTimeWindow,
    /// `extensions.limits`
    ExtensionsLimits,
}

/// The fixed check order (§4.6).
pub const CHECK_ORDER: [CheckId; 10] = [
    CheckId::JwsParse,
    CheckId::LimitsReceiptBytes,
    CheckId::JwsProtectedHeader,
    CheckId::ClaimsSchemaUnverified,
    CheckId::IssuerTrustPolicy,
    CheckId::IssuerDiscovery,
    CheckId::KeyResolve,
    CheckId::JwsSignature,
    CheckId::ClaimsTimeWindow,
    CheckId::ExtensionsLimits,
];

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The check passed.
    Pass,
    /// The check failed; this is the first failure in the report.
    Fail,
    /// Skipped, either because an earlier check failed (`short_circuit`) or
    /// because this check's precondition doesn't apply.
    Skip,
}

/// A single row of the shape-stable report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckResult {
    /// Which check this row reports on.
    pub check: CheckId,
    /// Pass, fail, or skip.
    pub status: CheckStatus,
    /// Reason code for a `fail`/`skip`, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Top-level reason bound to the first failing check, or `ok`.
pub const REASON_OK: &str = "ok";
/// §4.6 reason code for a short-circuited (not independently evaluated) check.
pub const REASON_SHORT_CIRCUIT: &str = "short_circuit";

/// The shape-stable verification report (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyReport {
    /// Whether the receipt is valid (every check `pass`).
    pub valid: bool,
    /// Reason bound to the first failing check, or `"ok"`.
    pub reason: String,
    /// One row per check, in fixed order.
    pub checks: Vec<CheckResult>,
    /// The claims, if they were at least structurally parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ReceiptClaims>,
    /// Digest of the JWKS document used to resolve the signing key, omitted
    /// in deterministic-report mode (§4.6 "Determinism").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_jwks_digest: Option<String>,
}

struct Runner {
    results: Vec<CheckResult>,
    short_circuited: bool,
}

impl Runner {
    fn new() -> Self {
        Self {
            results: Vec::new(),
            short_circuited: false,
        }
    }

    fn pass(&mut self, check: CheckId) {
        self.results.push(CheckResult {
            check,
            status: CheckStatus::Pass,
            reason: None,
        });
    }

    fn fail(&mut self, check: CheckId, reason: &str) {
        self.results.push(CheckResult {
            check,
            status: CheckStatus::Fail,
            reason: Some(reason.to_string()),
        });
        self.short_circuited = true;
    }

    fn skip_remaining(&mut self, from: usize) {
        for check in &CHECK_ORDER[from..] {
            self.results.push(CheckResult {
                check: *check,
                status: CheckStatus::Skip,
                reason: Some(REASON_SHORT_CIRCUIT.to_string()),
            });
        }
    }

    fn finish(self, claims: Option<ReceiptClaims>, issuer_jwks_digest: Option<String>) -> VerifyReport {
        let reason = self
            .results
            .iter()
            .find(|r| r.status == CheckStatus::Fail)
            .and_then(|r| r.reason.clone())
            .unwrap_or_else(|| REASON_OK.to_string());
        let valid = self.results.iter().all(|r| r.status == CheckStatus::Pass);
        if !valid {
            tracing::debug!(reason, "receipt verification failed");
        }
        VerifyReport {
            valid,
            reason,
            checks: self.results,
            claims,
            issuer_jwks_digest,
        }
    }
}

/// Normalise an `https://host[:port]` origin: lowercase scheme+host, drop a
/// trailing slash, drop the default `:443` port.
fn normalise_origin(origin: &str) -> Option<String> {
    let url = reqwest::Url::parse(origin).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let port = url.port();
    Some(match port {
        Some(443) | None => format!("https://{host}"),
        Some(p) => format!("https://{host}:{p}"),
    })
}

/// Run the fixed-order ten-check pipeline over `jws` (§4.6).
///
/// `now_unix_seconds` is caller-supplied (never read from the wall clock
/// internally) so the function stays a pure transform of its inputs.
/// `deterministic` omits `issuer_jwks_digest` from the returned report.
pub async fn verify(
    jws: &str,
    policy: &VerifierPolicyConfig,
    cache: &JwksCache,
    now_unix_seconds: i64,
    deterministic: bool,
) -> VerifyReport {
    tracing::debug!(deterministic, "verifying receipt");
    let mut runner = Runner::new();

    // 1. jws.parse
    let parsed: ParsedJws = match parse_compact(jws) {
        Ok(p) => {
            runner.pass(CheckId::JwsParse);
            p
        }
        Err(_) => {
            runner.fail(CheckId::JwsParse, "malformed_receipt");
            runner.skip_remaining(1);
            return runner.finish(None, None);
        }
    };

    // 2. limits.receipt_bytes
    if jws.len() as u64 > policy.limits.max_receipt_bytes {
        runner.fail(CheckId::LimitsReceiptBytes, "receipt_too_large");
        runner.skip_remaining(2);
        return runner.finish(None, None);
    }
    runner.pass(CheckId::LimitsReceiptBytes);

    // 3. jws.protected_header
    if parsed.header.alg != "EdDSA"
        || !parsed.header.typ.starts_with("peac.receipt/")
        || parsed.header.kid.trim().is_empty()
        || !parsed.header.crit.is_empty()
    {
        runner.fail(CheckId::JwsProtectedHeader, "schema_invalid");
        runner.skip_remaining(3);
        return runner.finish(None, None);
    }
    runner.pass(CheckId::JwsProtectedHeader);

    // 4. claims.schema_unverified
    let claims: ReceiptClaims = match serde_json::from_value(parsed.payload.clone()) {
        Ok(c) => {
            runner.pass(CheckId::ClaimsSchemaUnverified);
            c
        }
        Err(_) => {
            runner.fail(CheckId::ClaimsSchemaUnverified, "schema_invalid");
            runner.skip_remaining(4);
            return runner.finish(None, None);
        }
    };

    // 5. issuer.trust_policy
    let issuer_origin = match normalise_origin(&claims.iss) {
        Some(origin) if policy.issuer_allowlist.iter().any(|a| {
            normalise_origin(a).as_deref() == Some(origin.as_str())
        }) =>
        {
            runner.pass(CheckId::IssuerTrustPolicy);
            origin
        }
        _ => {
            runner.fail(CheckId::IssuerTrustPolicy, "issuer_not_allowed");
            runner.skip_remaining(5);
            return runner.finish(Some(claims), None);
        }
    };

    // 6. issuer.discovery / 7. key.resolve
    let pin = policy.find_pin(&issuer_origin, &parsed.header.kid);
    let (jwk, jwks_digest): (Jwk, Option<String>) = match resolve_key(
        policy, pin, &issuer_origin, &parsed.header.kid, cache,
    )
    .await
    {
        Ok(resolved) => resolved,
        Err(KeyResolveFailure::DiscoverySkippedThenKeyFail) => {
            runner.pass(CheckId::IssuerDiscovery);
            runner.fail(CheckId::KeyResolve, "key_not_found");
            runner.skip_remaining(7);
            return runner.finish(Some(claims), None);
        }
        Err(KeyResolveFailure::Discovery(code)) => {
            runner.fail(CheckId::IssuerDiscovery, code);
            runner.skip_remaining(6);
            return runner.finish(Some(claims), None);
        }
        Err(KeyResolveFailure::Key(code)) => {
            runner.pass(CheckId::IssuerDiscovery);
            runner.fail(CheckId::KeyResolve, code);
            runner.skip_remaining(7);
            return runner.finish(Some(claims), None);
        }
    };
    runner.pass(CheckId::IssuerDiscovery);
    runner.pass(CheckId::KeyResolve);

    // 8. jws.signature
    let verifying_key = match jwk.to_verifying_key() {
        Ok(k) => k,
        Err(_) => {
            runner.fail(CheckId::JwsSignature, "signature_invalid");
            runner.skip_remaining(8);
            return runner.finish(Some(claims), None);
        }
    };
    if verify_signature(&parsed, &verifying_key).is_err() {
        runner.fail(CheckId::JwsSignature, "signature_invalid");
        runner.skip_remaining(8);
        return runner.finish(Some(claims), None);
    }
    runner.pass(CheckId::JwsSignature);

    // 9. claims.time_window
    if claims.iat > now_unix_seconds + 60 {
        runner.fail(CheckId::ClaimsTimeWindow, "not_yet_valid");
        runner.skip_remaining(9);
        return runner.finish(Some(claims), None);
    }
    if let Some(exp) = claims.exp {
        if exp < now_unix_seconds {
            runner.fail(CheckId::ClaimsTimeWindow, "expired");
            runner.skip_remaining(9);
            return runner.finish(Some(claims), None);
        }
    }
    runner.pass(CheckId::ClaimsTimeWindow);

    // 10. extensions.limits
    for value in claims.ext.values() {
        let jcs = match canonicalize(value) {
            Ok(j) => j,
            Err(_) => {
                runner.fail(CheckId::ExtensionsLimits, "extension_too_large");
                return runner.finish(Some(claims), jwks_digest_for_report(deterministic, jwks_digest));
            }
        };
        if jcs.len() as u64 > policy.limits.max_extension_bytes {
            runner.fail(CheckId::ExtensionsLimits, "extension_too_large");
            return runner.finish(Some(claims), jwks_digest_for_report(deterministic, jwks_digest));
        }
    }
    runner.pass(CheckId::ExtensionsLimits);

    runner.finish(Some(claims), jwks_digest_for_report(deterministic, jwks_digest))
}

fn jwks_digest_for_report(deterministic: bool, digest: Option<String>) -> Option<String> {
    if deterministic { None } else { digest }
}

enum KeyResolveFailure {
    /// Offline-only mode with no pin: discovery is `skip`, then `key.resolve` fails.
    DiscoverySkippedThenKeyFail,
    /// `issuer.discovery` itself failed (network_blocked/network_error).
    Discovery(&'static str),
    /// `key.resolve` failed for a reason other than a skipped discovery.
    Key(&'static str),
}

async fn resolve_key(
    policy: &VerifierPolicyConfig,
    pin: Option<&peac_config::TrustPin>,
    issuer_origin: &str,
    kid: &str,
    cache: &JwksCache,
) -> Result<(Jwk, Option<String>), KeyResolveFailure> {
    let use_pin_offline = matches!(policy.mode, VerifierMode::OfflinePreferred | VerifierMode::OfflineOnly)
        && pin.map(|p| p.has_key_material()).unwrap_or(false);

    if use_pin_offline {
        let pin = pin.unwrap();
        let jwk = pin_to_jwk(pin, kid)?;
        if jwk.thumbprint_sha256() != pin.jwk_thumbprint_sha256 {
            return Err(KeyResolveFailure::Key("policy_violation"));
        }
        if !jwk.is_supported_key_type() || !jwk.permits_verify() {
            return Err(KeyResolveFailure::Key("policy_violation"));
        }
        return Ok((jwk, None));
    }

    if policy.mode == VerifierMode::OfflineOnly {
        return Err(KeyResolveFailure::DiscoverySkippedThenKeyFail);
    }

    let jwks = discover_jwks(
        cache,
        issuer_origin,
        policy.limits.discovery_timeout_ms,
        policy.limits.max_jwks_keys,
    )
    .await
    .map_err(|e| KeyResolveFailure::Discovery(network_reason(&e)))?;

    let jwk = jwks
        .find(kid)
        .cloned()
        .ok_or(KeyResolveFailure::Key("key_not_found"))?;

    if let Some(pin) = pin {
        if jwk.thumbprint_sha256() != pin.jwk_thumbprint_sha256 {
            return Err(KeyResolveFailure::Key("policy_violation"));
        }
    }
    if !jwk.is_supported_key_type() || !jwk.permits_verify() {
        return Err(KeyResolveFailure::Key("policy_violation"));
    }

    let digest = peac_canon::sha256_hex(serde_json::to_vec(&jwks).unwrap_or_default().as_slice());
    Ok((jwk, Some(digest)))
}

fn pin_to_jwk(pin: &peac_config::TrustPin, kid: &str) -> Result<Jwk, KeyResolveFailure> {
    if let Some(jwk_value) = &pin.jwk {
        return serde_json::from_value(jwk_value.clone()).map_err(|_| KeyResolveFailure::Key("key_not_found"));
    }
    if let Some(bytes) = &pin.public_key_bytes {
        use base64::Engine;
        let x = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        return Ok(Jwk {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x,
            kid: kid.to_string(),
            use_: "sig".to_string(),
            key_ops: vec!["verify".to_string()],
        });
    }
    Err(KeyResolveFailure::Key("key_not_found"))
}

fn network_reason(e: &PeacError) -> &'static str {
    match e.code {
        peac_error::ErrorCode::VerifyNetworkBlocked => "network_blocked",
        _ => "network_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClaimsInput, PaymentEnv, PaymentEvidence};
    use crate::issuer::issue;
    use ed25519_dalek::SigningKey;
    use peac_config::TrustPin;
    use std::collections::BTreeMap;

    fn payment() -> PaymentEvidence {
        PaymentEvidence {
            rail: "x402".into(),
            reference: "pay_test".into(),
            amount: 1000,
            currency: "USD".into(),
            asset: "USDC".into(),
            env: PaymentEnv::Live,
            evidence: None,
        }
    }

    fn claims_input() -> ClaimsInput {
        ClaimsInput {
            iss: "https://issuer.example.com".into(),
            aud: "https://merchant.example.com".into(),
            exp: None,
            amt: 1000,
            cur: "USD".into(),
            payment: payment(),
            subject_snapshot: None,
            ext: BTreeMap::new(),
        }
    }

    fn pinned_policy(signing: &SigningKey, kid: &str) -> VerifierPolicyConfig {
        let jwk = Jwk::from_verifying_key(&signing.verifying_key(), kid);
        let mut policy = VerifierPolicyConfig::default();
        policy.issuer_allowlist.push("https://issuer.example.com".to_string());
        policy.pinned_keys.push(TrustPin {
            issuer: "https://issuer.example.com".to_string(),
            kid: kid.to_string(),
            jwk_thumbprint_sha256: jwk.thumbprint_sha256(),
            jwk: Some(serde_json::to_value(&jwk).unwrap()),
            public_key_bytes: None,
        });
        policy
    }

    #[tokio::test]
    async fn valid_receipt_passes_all_checks() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let policy = pinned_policy(&signing, "k1");
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert!(report.valid);
        assert_eq!(report.reason, REASON_OK);
        assert!(report.checks.iter().all(|c| c.status == CheckStatus::Pass));
        let rid = uuid::Uuid::parse_str(&report.claims.unwrap().rid).unwrap();
        assert_eq!(rid.get_version_num(), 7);
    }

    #[tokio::test]
    async fn tampered_signature_fails_at_jws_signature_and_short_circuits() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let policy = pinned_policy(&signing, "k1");
        let cache = JwksCache::new();

        let mut segments: Vec<&str> = receipt.jws.split('.').collect();
        let tampered_sig = "A".repeat(segments[2].len());
        segments[2] = &tampered_sig;
        let tampered = segments.join(".");

        let report = verify(&tampered, &policy, &cache, 1_700_000_010, false).await;
        assert!(!report.valid);
        assert_eq!(report.reason, "signature_invalid");
        let sig_check = report
            .checks
            .iter()
            .find(|c| c.check == CheckId::JwsSignature)
            .unwrap();
        assert_eq!(sig_check.status, CheckStatus::Fail);
        let time_check = report
            .checks
            .iter()
            .find(|c| c.check == CheckId::ClaimsTimeWindow)
            .unwrap();
        assert_eq!(time_check.status, CheckStatus::Skip);
        assert_eq!(time_check.reason.as_deref(), Some(REASON_SHORT_CIRCUIT));
    }

    #[tokio::test]
    async fn unallowlisted_issuer_fails_trust_policy() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let mut policy = pinned_policy(&signing, "k1");
        policy.issuer_allowlist.clear();
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert_eq!(report.reason, "issuer_not_allowed");
    }

    #[tokio::test]
    async fn expired_receipt_fails_time_window() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let mut input = claims_input();
        input.exp = Some(1_700_000_100);
        let receipt = issue(input, &signing, "k1", 1_700_000_000, 4096).unwrap();
        let policy = pinned_policy(&signing, "k1");
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_001_000, false).await;
        assert_eq!(report.reason, "expired");
    }

    #[tokio::test]
    async fn not_yet_valid_when_iat_far_in_future() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_500, 4096).unwrap();
        let policy = pinned_policy(&signing, "k1");
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_000, false).await;
        assert_eq!(report.reason, "not_yet_valid");
    }

    #[tokio::test]
    async fn pin_thumbprint_mismatch_is_policy_violation() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let mut policy = pinned_policy(&signing, "k1");
        policy.pinned_keys[0].jwk_thumbprint_sha256 = "wrong-thumbprint".to_string();
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert_eq!(report.reason, "policy_violation");
    }

    #[tokio::test]
    async fn pinned_key_not_for_signing_use_is_policy_violation() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let mut policy = pinned_policy(&signing, "k1");
        let mut jwk: Jwk =
            serde_json::from_value(policy.pinned_keys[0].jwk.clone().unwrap()).unwrap();
        jwk.use_ = "enc".to_string();
        policy.pinned_keys[0].jwk = Some(serde_json::to_value(&jwk).unwrap());
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert_eq!(report.reason, "policy_violation");
        let key_check = report
            .checks
            .iter()
            .find(|c| c.check == CheckId::KeyResolve)
            .unwrap();
        assert_eq!(key_check.status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn pinned_key_without_verify_key_op_is_policy_violation() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let mut policy = pinned_policy(&signing, "k1");
        let mut jwk: Jwk =
            serde_json::from_value(policy.pinned_keys[0].jwk.clone().unwrap()).unwrap();
        jwk.key_ops = Vec::new();
        policy.pinned_keys[0].jwk = Some(serde_json::to_value(&jwk).unwrap());
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert_eq!(report.reason, "policy_violation");
    }

    #[tokio::test]
    async fn offline_only_without_pin_fails_key_resolve() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let mut policy = VerifierPolicyConfig::default();
        policy.mode = VerifierMode::OfflineOnly;
        policy.issuer_allowlist.push("https://issuer.example.com".to_string());
        let cache = JwksCache::new();

        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, false).await;
        assert_eq!(report.reason, "key_not_found");
        let discovery_check = report
            .checks
            .iter()
            .find(|c| c.check == CheckId::IssuerDiscovery)
            .unwrap();
        assert_eq!(discovery_check.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn malformed_jws_fails_first_check_and_skips_the_rest() {
        let policy = VerifierPolicyConfig::default();
        let cache = JwksCache::new();
        let report = verify("not.a.jws!!", &policy, &cache, 1_700_000_000, false).await;
        assert_eq!(report.reason, "malformed_receipt");
        assert_eq!(report.checks.len(), 10);
        assert_eq!(report.checks[0].status, CheckStatus::Fail);
        for check in &report.checks[1..] {
            assert_eq!(check.status, CheckStatus::Skip);
        }
    }

    #[tokio::test]
    async fn deterministic_mode_omits_jwks_digest() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let receipt = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
        let policy = pinned_policy(&signing, "k1");
        let cache = JwksCache::new();
        let report = verify(&receipt.jws, &policy, &cache, 1_700_000_010, true).await;
        assert!(report.issuer_jwks_digest.is_none());
    }
}
