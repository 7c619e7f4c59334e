//! `CapturedAction`: the input to a capture session (§3).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal status of the underlying tool/agent interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Error,
    /// Did not complete before a deadline.
    Timeout,
    /// Was cancelled before completion.
    Canceled,
}

/// A policy decision snapshot attached to the action at capture time.
///
/// Free-form by design: the capture layer does not interpret this, it only
/// carries it through to the persisted [`crate::entry::SpoolEntry`] so a
/// later reader can see what policy was in force when the action happened.
pub type PolicySnapshot = serde_json::Value;

/// Input to [`capture`](../peac_capture/fn.capture.html), not persisted
/// verbatim — raw bytes are hashed and discarded before the
/// [`crate::entry::SpoolEntry`] is built.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapturedAction {
    /// Stable idempotency key.
    pub id: String,
    /// Action kind, e.g. `"tool.call"`.
    pub kind: String,
    /// Platform/adapter identifier, e.g. `"test"`, `"vscode"`.
    pub platform: String,
    /// RFC 3339 timestamp when the action started.
    pub started_at: String,

    /// Adapter/plugin version identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Plugin identifier, when the action was mediated by a plugin host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    /// Tool or resource the action targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Raw input payload, hashed then discarded — never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "bytes_b64_opt")]
    pub input_bytes: Option<Vec<u8>>,
    /// Raw output payload, hashed then discarded — never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "bytes_b64_opt")]
    pub output_bytes: Option<Vec<u8>>,

    /// RFC 3339 timestamp when the action completed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Wall-clock duration in milliseconds, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    /// Adapter-specific error code, present when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Whether the caller may safely retry the underlying operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Policy decision in force when the action was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_snapshot: Option<PolicySnapshot>,
    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// `CapturedAction` minus the raw byte payloads — this is what is actually
/// persisted inside a [`crate::entry::SpoolEntry`] (§3: "action (CapturedAction
/// minus raw bytes)").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StrippedAction {
    /// Stable idempotency key.
    pub id: String,
    /// Action kind, e.g. `"tool.call"`.
    pub kind: String,
    /// Platform/adapter identifier.
    pub platform: String,
    /// RFC 3339 timestamp when the action started.
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_snapshot: Option<PolicySnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CapturedAction {
    /// Validate the required fields (§4.4 step 2): `id`, `kind`, `platform`,
    /// `started_at` must all be non-empty, and `started_at`/`completed_at`
    /// (when present) must parse as RFC 3339 timestamps.
    pub fn validate_required_fields(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty");
        }
        if self.kind.trim().is_empty() {
            return Err("kind must not be empty");
        }
        if self.platform.trim().is_empty() {
            return Err("platform must not be empty");
        }
        if self.started_at.trim().is_empty() {
            return Err("started_at must not be empty");
        }
        if chrono::DateTime::parse_from_rfc3339(&self.started_at).is_err() {
            return Err("started_at must be a valid RFC 3339 timestamp");
        }
        if let Some(ref completed_at) = self.completed_at
            && chrono::DateTime::parse_from_rfc3339(completed_at).is_err()
        {
            return Err("completed_at must be a valid RFC 3339 timestamp");
        }
        Ok(())
    }

    /// Derive `captured_at` per §3: `completed_at ?? started_at`, purely a
    /// function of the action's own fields — never the wall clock.
    pub fn captured_at(&self) -> String {
        self.completed_at.clone().unwrap_or_else(|| self.started_at.clone())
    }

    /// Strip the raw byte payloads, producing the persisted form.
    pub fn strip(&self) -> StrippedAction {
        StrippedAction {
            id: self.id.clone(),
            kind: self.kind.clone(),
            platform: self.platform.clone(),
            started_at: self.started_at.clone(),
            version: self.version.clone(),
            plugin_id: self.plugin_id.clone(),
            target: self.target.clone(),
            completed_at: self.completed_at.clone(),
            duration_ms: self.duration_ms,
            status: self.status,
            error_code: self.error_code.clone(),
            retryable: self.retryable,
            policy_snapshot: self.policy_snapshot.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

mod bytes_b64_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        opt.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
