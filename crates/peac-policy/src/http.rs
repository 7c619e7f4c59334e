//! Decision → HTTP status mapping (§4.7).
//!
//! Two distinct ladders exist and must never be confused: general
//! enforcement (which may challenge with 402) and purpose enforcement
//! (which never does).

use crate::document::Decision;

/// `WWW-Authenticate` header value general enforcement attaches to a 402
/// review challenge.
pub const RECEIPT_CHALLENGE_HEADER_VALUE: &str = r#"PEAC realm="receipt", error="receipt_required""#;
const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

/// The HTTP status and optional header general enforcement maps a
/// [`Decision`] to.
///
/// `receipt_verified` downgrades a `review` to `200`: once the caller has
/// presented a verified receipt, no further challenge is issued.
pub fn general_enforcement_response(decision: Decision, receipt_verified: bool) -> (u16, Option<(&'static str, String)>) {
    match decision {
        Decision::Allow => (200, None),
        Decision::Deny => (403, None),
        Decision::Review if receipt_verified => (200, None),
        Decision::Review => (402, Some((WWW_AUTHENTICATE, RECEIPT_CHALLENGE_HEADER_VALUE.to_string()))),
    }
}

/// Outcome of purpose enforcement: either a regular [`Decision`], or an
/// invalid (not merely unknown) purpose token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurposeEnforcementOutcome {
    /// A decision reached via rules or the enforcement profile.
    Decision(Decision),
    /// The declared purpose token was structurally invalid (e.g. empty, or
    /// not a string on the wire) rather than merely unrecognised.
    InvalidToken,
}

/// The HTTP status purpose enforcement maps an outcome to.
///
/// This ladder **never** produces 402: `review` maps to `403`, and an
/// invalid token maps to `400`. 402 is reserved for general enforcement's
/// receipt/payment challenge.
pub fn purpose_enforcement_status(outcome: PurposeEnforcementOutcome) -> u16 {
    match outcome {
        PurposeEnforcementOutcome::Decision(Decision::Allow) => 200,
        PurposeEnforcementOutcome::Decision(Decision::Deny) => 403,
        PurposeEnforcementOutcome::Decision(Decision::Review) => 403,
        PurposeEnforcementOutcome::InvalidToken => 400,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_enforcement_maps_allow_deny_review() {
        assert_eq!(general_enforcement_response(Decision::Allow, false), (200, None));
        assert_eq!(general_enforcement_response(Decision::Deny, false), (403, None));
        let (status, header) = general_enforcement_response(Decision::Review, false);
        assert_eq!(status, 402);
        assert_eq!(header.unwrap().0, "WWW-Authenticate");
    }

    #[test]
    fn general_enforcement_review_with_verified_receipt_is_200() {
        assert_eq!(general_enforcement_response(Decision::Review, true), (200, None));
    }

    #[test]
    fn purpose_enforcement_never_produces_402() {
        for decision in [Decision::Allow, Decision::Deny, Decision::Review] {
            let status = purpose_enforcement_status(PurposeEnforcementOutcome::Decision(decision));
            assert_ne!(status, 402);
        }
        assert_ne!(purpose_enforcement_status(PurposeEnforcementOutcome::InvalidToken), 402);
    }

    #[test]
    fn purpose_enforcement_review_maps_to_403_not_402() {
        assert_eq!(
            purpose_enforcement_status(PurposeEnforcementOutcome::Decision(Decision::Review)),
            403
        );
    }

    #[test]
    fn purpose_enforcement_invalid_token_is_400() {
        assert_eq!(purpose_enforcement_status(PurposeEnforcementOutcome::InvalidToken), 400);
    }
}
