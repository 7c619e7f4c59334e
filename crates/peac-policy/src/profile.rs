//! Enforcement profiles: the fallback behaviour applied when no explicit
//! rule matches a request (§4.7).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::Decision;

/// The three enforcement postures a deployment can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementProfile {
    /// Deny by default; receipts required.
    Strict,
    /// Route to review by default; receipts optional, with a default rate limit.
    Balanced,
    /// Allow by default; receipts optional.
    Open,
}

impl Default for EnforcementProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

/// A request-level rate limit applied when no rule overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateLimit {
    /// Maximum requests permitted in `window_seconds`.
    pub max_requests: u32,
    /// The sliding window, in seconds, `max_requests` applies over.
    pub window_seconds: u32,
    /// Suggested `Retry-After` value, in seconds, once the limit is hit.
    pub retry_after_seconds: u32,
}

/// The default constraints a profile applies alongside its decision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProfileConstraints {
    /// Rate limit applied by default, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

impl EnforcementProfile {
    /// The decision applied when a request declares no purpose at all.
    pub fn undeclared_purpose_decision(self) -> Decision {
        match self {
            Self::Strict => Decision::Deny,
            Self::Balanced => Decision::Review,
            Self::Open => Decision::Allow,
        }
    }

    /// The decision applied when a request declares a purpose token that
    /// doesn't resolve to a canonical purpose (and isn't a known legacy alias).
    pub fn unknown_token_decision(self) -> Decision {
        match self {
            Self::Strict => Decision::Deny,
            Self::Balanced => Decision::Review,
            Self::Open => Decision::Allow,
        }
    }

    /// Whether a verified receipt is required under this profile absent an
    /// overriding rule.
    pub fn receipts_required(self) -> bool {
        matches!(self, Self::Strict)
    }

    /// The default resource constraints this profile applies.
    pub fn default_constraints(self) -> ProfileConstraints {
        match self {
            Self::Strict | Self::Open => ProfileConstraints::default(),
            Self::Balanced => ProfileConstraints {
                rate_limit: Some(RateLimit {
                    max_requests: 100,
                    window_seconds: 3600,
                    retry_after_seconds: 60,
                }),
            },
        }
    }
}
