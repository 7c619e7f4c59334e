//! The declarative policy document and its evaluation (§4.7).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use peac_error::{ErrorCode, PeacError};

use crate::profile::EnforcementProfile;
use crate::purpose::resolve_purpose;

/// The outcome of evaluating a request against a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Permit the request.
    Allow,
    /// Refuse the request.
    Deny,
    /// Route the request to a review/challenge path.
    Review,
}

/// Subject-matching criteria a [`Rule`] may declare.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RuleSubject {
    /// Subject type to match, e.g. `"bot"`, `"human"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
    /// Labels the request's subject must carry all of, if non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// A single rule in a [`PolicyDocument`] (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    /// Human-readable rule name, surfaced in the evaluation result.
    pub name: String,
    /// Subject criteria this rule applies to, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<RuleSubject>,
    /// Purpose token this rule applies to, if restricted. Accepts canonical
    /// tokens and legacy aliases (§4.7).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Licensing mode this rule applies to, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensing_mode: Option<String>,
    /// Decision applied when this rule matches.
    pub decision: Decision,
    /// Human-readable reason surfaced alongside the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Document-level fallback decision, used when no rule matches and the
/// request doesn't fall into one of the purpose-token special cases.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Defaults {
    /// The fallback decision.
    pub decision: Decision,
    /// Optional fallback reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A declarative policy document: a version tag, document-level defaults,
/// and an ordered list of rules (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDocument {
    /// Document schema version.
    pub version: u32,
    /// Fallback decision for requests no rule or purpose special-case covers.
    pub defaults: Defaults,
    /// Rules, evaluated in order; the first full match wins.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl PolicyDocument {
    /// Validate structural invariants: `version` must be `1`, and every
    /// rule's `purpose` (if present) must resolve to a known token.
    pub fn validate(&self) -> Result<(), PeacError> {
        if self.version != 1 {
            return Err(PeacError::new(
                ErrorCode::PolicyInvalid,
                format!("unsupported policy document version {}", self.version),
            ));
        }
        for rule in &self.rules {
            if let Some(purpose) = &rule.purpose {
                if resolve_purpose(purpose).is_none() {
                    return Err(PeacError::new(
                        ErrorCode::PolicyInvalid,
                        format!("rule '{}' declares unknown purpose token '{purpose}'", rule.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The request context a [`PolicyDocument`] is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Purpose tokens the requester declared, as received on the wire
    /// (canonical or legacy alias form).
    pub declared_purposes: Vec<String>,
    /// The requester's subject type, if known.
    pub subject_type: Option<String>,
    /// Labels carried by the requester's subject.
    pub subject_labels: Vec<String>,
    /// The licensing mode in effect for this request, if any.
    pub licensing_mode: Option<String>,
}

/// The reason a purpose-token special case (rather than an explicit rule or
/// the document's own default) produced the decision.
pub mod purpose_reason {
    /// No purpose was declared at all.
    pub const UNDECLARED_DEFAULT: &str = "undeclared_default";
    /// At least one declared token didn't resolve to a canonical purpose.
    pub const UNKNOWN_TOKEN: &str = "unknown_token";
}

/// The result of evaluating a [`RequestContext`] against a [`PolicyDocument`]
/// under an [`EnforcementProfile`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationResult {
    /// The decision reached.
    pub decision: Decision,
    /// Reason text, from the matching rule or the document defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set when a purpose-token special case (not a rule or document
    /// default) produced the decision; see [`purpose_reason`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose_reason: Option<String>,
    /// Name of the rule that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

fn rule_matches(rule: &Rule, ctx: &RequestContext) -> bool {
    if let Some(subject) = &rule.subject {
        if let Some(wanted_type) = &subject.subject_type {
            if ctx.subject_type.as_deref() != Some(wanted_type.as_str()) {
                return false;
            }
        }
        if !subject.labels.iter().all(|l| ctx.subject_labels.contains(l)) {
            return false;
        }
    }
    if let Some(wanted_purpose) = &rule.purpose {
        let wanted = resolve_purpose(wanted_purpose);
        let declared_matches = ctx
            .declared_purposes
            .iter()
            .any(|p| resolve_purpose(p) == wanted && wanted.is_some());
        if !declared_matches {
            return false;
        }
    }
    if let Some(wanted_mode) = &rule.licensing_mode {
        if ctx.licensing_mode.as_deref() != Some(wanted_mode.as_str()) {
            return false;
        }
    }
    true
}

/// Evaluate `ctx` against `doc` under `profile` (§4.7).
///
/// Rules are tried in document order; the first full match wins. If no rule
/// matches, an empty `declared_purposes` or an unresolvable token takes
/// precedence over the document's own `defaults` (the enforcement profile's
/// purpose-specific behaviour is more specific than the document fallback).
pub fn evaluate(doc: &PolicyDocument, profile: EnforcementProfile, ctx: &RequestContext) -> EvaluationResult {
    for rule in &doc.rules {
        if rule_matches(rule, ctx) {
            tracing::debug!(rule = rule.name, decision = ?rule.decision, "policy rule matched");
            return EvaluationResult {
                decision: rule.decision,
                reason: rule.reason.clone(),
                purpose_reason: None,
                matched_rule: Some(rule.name.clone()),
            };
        }
    }

    if ctx.declared_purposes.is_empty() {
        return EvaluationResult {
            decision: profile.undeclared_purpose_decision(),
            reason: None,
            purpose_reason: Some(purpose_reason::UNDECLARED_DEFAULT.to_string()),
            matched_rule: None,
        };
    }

    let any_unknown = ctx.declared_purposes.iter().any(|p| resolve_purpose(p).is_none());
    if any_unknown {
        return EvaluationResult {
            decision: profile.unknown_token_decision(),
            reason: None,
            purpose_reason: Some(purpose_reason::UNKNOWN_TOKEN.to_string()),
            matched_rule: None,
        };
    }

    EvaluationResult {
        decision: doc.defaults.decision,
        reason: doc.defaults.reason.clone(),
        purpose_reason: None,
        matched_rule: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(rules: Vec<Rule>) -> PolicyDocument {
        PolicyDocument {
            version: 1,
            defaults: Defaults {
                decision: Decision::Allow,
                reason: Some("document default".to_string()),
            },
            rules,
        }
    }

    #[test]
    fn empty_purposes_hits_profile_undeclared_case_for_every_profile() {
        let document = doc(vec![]);
        let ctx = RequestContext::default();

        let balanced = evaluate(&document, EnforcementProfile::Balanced, &ctx);
        assert_eq!(balanced.decision, Decision::Review);
        assert_eq!(balanced.purpose_reason.as_deref(), Some("undeclared_default"));

        let strict = evaluate(&document, EnforcementProfile::Strict, &ctx);
        assert_eq!(strict.decision, Decision::Deny);

        let open = evaluate(&document, EnforcementProfile::Open, &ctx);
        assert_eq!(open.decision, Decision::Allow);
    }

    #[test]
    fn unknown_token_hits_profile_unknown_case() {
        let document = doc(vec![]);
        let ctx = RequestContext {
            declared_purposes: vec!["scrape".to_string()],
            ..Default::default()
        };
        let result = evaluate(&document, EnforcementProfile::Balanced, &ctx);
        assert_eq!(result.decision, Decision::Review);
        assert_eq!(result.purpose_reason.as_deref(), Some("unknown_token"));
    }

    #[test]
    fn matching_rule_wins_over_profile_defaults() {
        let document = doc(vec![Rule {
            name: "allow-search".to_string(),
            subject: None,
            purpose: Some("search".to_string()),
            licensing_mode: None,
            decision: Decision::Allow,
            reason: Some("search is always allowed".to_string()),
        }]);
        let ctx = RequestContext {
            declared_purposes: vec!["search".to_string()],
            ..Default::default()
        };
        let result = evaluate(&document, EnforcementProfile::Strict, &ctx);
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.matched_rule.as_deref(), Some("allow-search"));
    }

    #[test]
    fn legacy_alias_matches_rule_written_against_canonical_token() {
        let document = doc(vec![Rule {
            name: "deny-index".to_string(),
            subject: None,
            purpose: Some("index".to_string()),
            licensing_mode: None,
            decision: Decision::Deny,
            reason: None,
        }]);
        let ctx = RequestContext {
            declared_purposes: vec!["crawl".to_string()],
            ..Default::default()
        };
        let result = evaluate(&document, EnforcementProfile::Open, &ctx);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.matched_rule.as_deref(), Some("deny-index"));
    }

    #[test]
    fn subject_type_and_labels_must_both_match() {
        let document = doc(vec![Rule {
            name: "trusted-bot".to_string(),
            subject: Some(RuleSubject {
                subject_type: Some("bot".to_string()),
                labels: vec!["verified".to_string()],
            }),
            purpose: None,
            licensing_mode: None,
            decision: Decision::Allow,
            reason: None,
        }]);

        let matching_ctx = RequestContext {
            subject_type: Some("bot".to_string()),
            subject_labels: vec!["verified".to_string(), "extra".to_string()],
            declared_purposes: vec!["search".to_string()],
            ..Default::default()
        };
        assert_eq!(evaluate(&document, EnforcementProfile::Strict, &matching_ctx).decision, Decision::Allow);

        let unlabelled_ctx = RequestContext {
            subject_type: Some("bot".to_string()),
            subject_labels: vec![],
            declared_purposes: vec!["search".to_string()],
            ..Default::default()
        };
        assert_ne!(
            evaluate(&document, EnforcementProfile::Strict, &unlabelled_ctx).matched_rule,
            Some("trusted-bot".to_string())
        );
    }

    #[test]
    fn falls_through_to_document_defaults_when_purposes_resolve_but_no_rule_matches() {
        let document = doc(vec![]);
        let ctx = RequestContext {
            declared_purposes: vec!["train".to_string()],
            ..Default::default()
        };
        let result = evaluate(&document, EnforcementProfile::Balanced, &ctx);
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.reason.as_deref(), Some("document default"));
        assert!(result.purpose_reason.is_none());
    }

    #[test]
    fn validate_rejects_unknown_version() {
        let mut document = doc(vec![]);
        document.version = 2;
        assert!(document.validate().is_err());
    }

    #[test]
    fn validate_rejects_unresolvable_rule_purpose() {
        let document = doc(vec![Rule {
            name: "bad".to_string(),
            subject: None,
            purpose: Some("not_a_token".to_string()),
            licensing_mode: None,
            decision: Decision::Deny,
            reason: None,
        }]);
        assert!(document.validate().is_err());
    }
}
