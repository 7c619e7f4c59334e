//! Canonical purpose tokens and the legacy aliases that map onto them (§4.7).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A canonical purpose token a request may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Model training.
    Train,
    /// Search indexing/retrieval at query time.
    Search,
    /// A direct, human-initiated action.
    UserAction,
    /// Model inference serving a request.
    Inference,
    /// Building or refreshing a search/AI index.
    Index,
}

impl Purpose {
    /// All canonical tokens, in a stable order.
    pub const ALL: [Purpose; 5] = [
        Purpose::Train,
        Purpose::Search,
        Purpose::UserAction,
        Purpose::Inference,
        Purpose::Index,
    ];

    /// The wire string this token serialises to.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Search => "search",
            Self::UserAction => "user_action",
            Self::Inference => "inference",
            Self::Index => "index",
        }
    }
}

/// Resolve a declared purpose token to a canonical [`Purpose`].
///
/// Accepts the five canonical tokens directly, plus three legacy aliases
/// that must keep resolving the same way indefinitely: `crawl` → `index`,
/// `ai_input` → `inference`, `ai_index` → `index`. Anything else is an
/// unknown token (`None`).
pub fn resolve_purpose(token: &str) -> Option<Purpose> {
    match token {
        "train" => Some(Purpose::Train),
        "search" => Some(Purpose::Search),
        "user_action" => Some(Purpose::UserAction),
        "inference" => Some(Purpose::Inference),
        "index" => Some(Purpose::Index),
        "crawl" => Some(Purpose::Index),
        "ai_input" => Some(Purpose::Inference),
        "ai_index" => Some(Purpose::Index),
        _ => None,
    }
}
