//! End-to-end scenarios across the spool, capture, receipt, and policy
//! crates, exercised together the way a real deployment wires them.

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;

use peac_capture::{CaptureResult, CaptureSession, InMemoryDedupeIndex};
use peac_canon::TruncateThreshold;
use peac_config::{SpoolConfig, TrustPin, VerifierLimits, VerifierMode, VerifierPolicyConfig};
use peac_core::CapturedAction;
use peac_policy::{
    Decision, Defaults, EnforcementProfile, PolicyDocument, RequestContext,
    general_enforcement_response,
};
use peac_receipt::claims::{ClaimsInput, PaymentEnv, PaymentEvidence};
use peac_receipt::jwk::Jwk;
use peac_receipt::{JwksCache, issue, verify};
use peac_spool::{SpoolState, SpoolStore};

fn action(id: &str) -> CapturedAction {
    CapturedAction {
        id: id.to_string(),
        kind: "tool.call".into(),
        platform: "test".into(),
        started_at: "2025-01-01T00:00:00Z".into(),
        version: None,
        plugin_id: None,
        target: None,
        input_bytes: None,
        output_bytes: None,
        completed_at: None,
        duration_ms: None,
        status: None,
        error_code: None,
        retryable: None,
        policy_snapshot: None,
        metadata: BTreeMap::new(),
    }
}

fn session(dir: &tempfile::TempDir) -> CaptureSession {
    session_with_config(dir, SpoolConfig::new(dir.path().join("s.ndjson").to_string_lossy().to_string()))
}

fn session_with_config(_dir: &tempfile::TempDir, config: SpoolConfig) -> CaptureSession {
    let store = SpoolStore::open(config, None).unwrap();
    CaptureSession::new(store, Arc::new(InMemoryDedupeIndex::new()), TruncateThreshold::Mib1)
}

/// Scenario 1: fresh chain.
#[tokio::test]
async fn fresh_chain() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let result = session.capture(action("a1")).await;
    let entry = match result {
        CaptureResult::Success { entry } => entry,
        CaptureResult::Failure { code, message } => panic!("expected success, got {code:?}: {message}"),
    };
    assert_eq!(entry.sequence, 1);
    assert_eq!(entry.prev_entry_digest, "0".repeat(64));
    assert_eq!(entry.entry_digest.len(), 64);
    assert!(entry.entry_digest.chars().all(|c| c.is_ascii_hexdigit()));
}

/// Scenario 2: duplicate capture.
#[tokio::test]
async fn duplicate_action_rejected_and_spool_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    assert!(session.capture(action("a1")).await.is_success());
    let second = session.capture(action("a1")).await;
    match second {
        CaptureResult::Failure { code, .. } => {
            assert_eq!(code, peac_error::ErrorCode::CaptureDuplicate)
        }
        other => panic!("expected duplicate failure, got {other:?}"),
    }
    assert_eq!(session.store().lock().await.sequence(), 1);
}

/// Scenario 3: cap trip.
#[tokio::test]
async fn cap_trip_fails_third_capture_and_store_goes_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = SpoolConfig::new(dir.path().join("s.ndjson").to_string_lossy().to_string());
    cfg.max_entries = Some(2);
    let session = session_with_config(&dir, cfg);

    assert_eq!(
        match session.capture(action("a1")).await {
            CaptureResult::Success { entry } => entry.sequence,
            other => panic!("expected success, got {other:?}"),
        },
        1
    );
    assert_eq!(
        match session.capture(action("a2")).await {
            CaptureResult::Success { entry } => entry.sequence,
            other => panic!("expected success, got {other:?}"),
        },
        2
    );

    let third = session.capture(action("a3")).await;
    match third {
        CaptureResult::Failure { code, .. } => assert_eq!(code, peac_error::ErrorCode::CaptureStoreFailed),
        other => panic!("expected store-failed failure, got {other:?}"),
    }
    assert_eq!(session.store().lock().await.state(), SpoolState::ReadOnly);
}

/// Scenario 4: recovery from an incomplete tail.
#[test]
fn recovery_from_incomplete_tail_truncates_and_stays_active() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.ndjson");

    let (entry1, entry2) = {
        let mut store = SpoolStore::open(SpoolConfig::new(path.to_string_lossy().to_string()), None).unwrap();
        let e1 = peac_core::EntrySkeleton::for_action(&action("a1"), None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        store.append(e1.clone()).unwrap();
        let e2 = peac_core::EntrySkeleton::for_action(&action("a2"), None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        store.append(e2.clone()).unwrap();
        store.commit().unwrap();
        (e1, e2)
    };

    let mut content = std::fs::read(&path).unwrap();
    content.extend_from_slice(br#"{"incomplete":"#);
    std::fs::write(&path, &content).unwrap();
    std::fs::remove_file(peac_spool::SpoolMeta::path_for(&path)).ok();

    let warnings: std::sync::Mutex<Vec<peac_spool::SpoolWarning>> = std::sync::Mutex::new(Vec::new());
    let warnings = std::sync::Arc::new(warnings);
    let sink_warnings = warnings.clone();
    let sink: peac_spool::WarningSink = std::sync::Arc::new(move |w| sink_warnings.lock().unwrap().push(w));

    let store = SpoolStore::open(SpoolConfig::new(path.to_string_lossy().to_string()), Some(sink)).unwrap();
    assert_eq!(store.state(), SpoolState::Active);
    assert_eq!(store.sequence(), 2);
    assert_eq!(store.head_digest(), entry2.entry_digest);
    let recorded = warnings.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(matches!(
        recorded[0],
        peac_spool::SpoolWarning::IncompleteTailTruncated { sequence_after: 1 }
    ));
    let _ = entry1;
}

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

fn verifier_policy_with_pin(pin_jwk: serde_json::Value, thumbprint: String) -> VerifierPolicyConfig {
    VerifierPolicyConfig {
        mode: VerifierMode::OfflinePreferred,
        issuer_allowlist: vec!["https://issuer.example.com".to_string()],
        pinned_keys: vec![TrustPin {
            issuer: "https://issuer.example.com".into(),
            kid: "k1".into(),
            jwk_thumbprint_sha256: thumbprint,
            jwk: Some(pin_jwk),
            public_key_bytes: None,
        }],
        limits: VerifierLimits::default(),
    }
}

/// Scenario 5: verifier success, offline, pinned key.
#[tokio::test]
async fn verifier_success_with_pinned_key() {
    let signing = SigningKey::from_bytes(&[11u8; 32]);
    let verifying = signing.verifying_key();
    let jwk = Jwk::from_verifying_key(&verifying, "k1");
    let thumbprint = jwk.thumbprint_sha256();

    let issued = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
    let policy = verifier_policy_with_pin(serde_json::to_value(&jwk).unwrap(), thumbprint);
    let cache = JwksCache::new();

    let report = verify(&issued.jws, &policy, &cache, 1_700_000_100, false).await;
    assert!(report.valid);
    assert_eq!(report.reason, "ok");
    assert!(report.checks.iter().all(|c| c.status == peac_receipt::CheckStatus::Pass));
    let rid = uuid::Uuid::parse_str(&issued.claims.rid).unwrap();
    assert_eq!(rid.get_version_num(), 7);
}

/// Scenario 6: verifier tamper — mutated amount, original signature kept.
#[tokio::test]
async fn verifier_tamper_fails_at_signature_and_short_circuits() {
    let signing = SigningKey::from_bytes(&[11u8; 32]);
    let verifying = signing.verifying_key();
    let jwk = Jwk::from_verifying_key(&verifying, "k1");
    let thumbprint = jwk.thumbprint_sha256();

    let issued = issue(claims_input(), &signing, "k1", 1_700_000_000, 4096).unwrap();
    let mut segments: Vec<&str> = issued.jws.split('.').collect();
    assert_eq!(segments.len(), 3);

    let mut tampered_claims = issued.claims.clone();
    tampered_claims.amt = 1;
    let tampered_value = serde_json::to_value(&tampered_claims).unwrap();
    let tampered_jcs = peac_canon::canonicalize(&tampered_value).unwrap();
    let tampered_payload_b64 = base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        tampered_jcs.as_bytes(),
    );
    segments[1] = &tampered_payload_b64;
    let tampered_jws = segments.join(".");

    let policy = verifier_policy_with_pin(serde_json::to_value(&jwk).unwrap(), thumbprint);
    let cache = JwksCache::new();
    let report = verify(&tampered_jws, &policy, &cache, 1_700_000_100, false).await;

    assert!(!report.valid);
    assert_eq!(report.reason, "signature_invalid");
    let statuses: Vec<_> = report.checks.iter().map(|c| c.status).collect();
    use peac_receipt::CheckStatus::{Fail, Pass, Skip};
    assert_eq!(
        statuses,
        vec![Pass, Pass, Pass, Pass, Pass, Pass, Pass, Fail, Skip, Skip]
    );
}

/// Scenario 7: purpose enforcement across strict/balanced/open profiles.
#[test]
fn purpose_enforcement_across_profiles_never_produces_402() {
    let doc = PolicyDocument {
        version: 1,
        defaults: Defaults { decision: Decision::Allow, reason: None },
        rules: Vec::new(),
    };
    let ctx = RequestContext::default();

    let balanced = peac_policy::evaluate(&doc, EnforcementProfile::Balanced, &ctx);
    assert_eq!(balanced.decision, Decision::Review);
    assert_eq!(balanced.purpose_reason.as_deref(), Some("undeclared_default"));
    let (status, header) = general_enforcement_response(balanced.decision, false);
    assert_eq!(status, 402);
    assert!(header.is_some());

    let strict = peac_policy::evaluate(&doc, EnforcementProfile::Strict, &ctx);
    assert_eq!(strict.decision, Decision::Deny);
    let (status, _) = general_enforcement_response(strict.decision, false);
    assert_eq!(status, 403);

    let open = peac_policy::evaluate(&doc, EnforcementProfile::Open, &ctx);
    assert_eq!(open.decision, Decision::Allow);
    let (status, _) = general_enforcement_response(open.decision, false);
    assert_eq!(status, 200);

    for decision in [strict.decision, balanced.decision, open.decision] {
        let status = peac_policy::purpose_enforcement_status(
            peac_policy::PurposeEnforcementOutcome::Decision(decision),
        );
        assert_ne!(status, 402);
    }
}
