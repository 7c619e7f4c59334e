//! Declarative policy evaluation: purpose tokens, enforcement profiles, and
//! the decision → HTTP status mapping (§4.7).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod document;
pub mod http;
pub mod profile;
pub mod purpose;

pub use document::{Decision, Defaults, EvaluationResult, PolicyDocument, RequestContext, Rule, RuleSubject, evaluate};
pub use http::{PurposeEnforcementOutcome, general_enforcement_response, purpose_enforcement_status};
pub use profile::{EnforcementProfile, ProfileConstraints, RateLimit};
pub use purpose::{Purpose, resolve_purpose};
