//! `<spool>.meta.json` sidecar (§4.2 Startup, §6).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

use peac_error::SpoolError;

/// Current meta-file schema version. A mismatch forces a full streaming scan.
pub const META_VERSION: u32 = 1;

/// Sidecar recording the spool's last-known-good head, for fast reopen.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SpoolMeta {
    /// Schema version of this meta file.
    pub meta_version: u32,
    /// Sequence of the last entry at the time this meta was written.
    pub sequence: u64,
    /// `entry_digest` of the last entry (or genesis if the spool is empty).
    pub head_digest: String,
    /// Total entry count.
    pub entry_count: u64,
    /// Size, in bytes, of the log file at the time this meta was written.
    pub file_bytes: u64,
    /// Log file's mtime, in milliseconds since the epoch, at that time.
    pub mtime_ms: u64,
}

impl SpoolMeta {
    /// Path of the meta sidecar for a given spool log path.
    pub fn path_for(spool_path: &Path) -> std::path::PathBuf {
        let mut s = spool_path.as_os_str().to_owned();
        s.push(".meta.json");
        std::path::PathBuf::from(s)
    }

    /// Load and parse the meta sidecar, if present and well-formed.
    ///
    /// A missing or unparseable meta file is not itself corruption — it just
    /// means the fast path is unavailable and a full scan is required.
    pub fn load(spool_path: &Path) -> Option<Self> {
        let meta_path = Self::path_for(spool_path);
        let content = std::fs::read_to_string(meta_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Whether this meta can be trusted without a full scan: version match,
    /// plus the log file's current size and mtime match what was recorded.
    pub fn is_fresh(&self, spool_path: &Path) -> bool {
        if self.meta_version != META_VERSION {
            return false;
        }
        let Ok(metadata) = std::fs::metadata(spool_path) else {
            return false;
        };
        if metadata.len() != self.file_bytes {
            return false;
        }
        let Some(mtime_ms) = mtime_millis(&metadata) else {
            return false;
        };
        mtime_ms == self.mtime_ms
    }

    /// Atomically (write-temp, rename) persist this meta to its sidecar path.
    pub fn write_atomic(&self, spool_path: &Path) -> Result<(), SpoolError> {
        let meta_path = Self::path_for(spool_path);
        let tmp_path = {
            let mut s = meta_path.as_os_str().to_owned();
            s.push(".tmp");
            std::path::PathBuf::from(s)
        };
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &meta_path)?;
        Ok(())
    }
}

/// mtime of `metadata`, in whole milliseconds since the Unix epoch.
pub fn mtime_millis(metadata: &std::fs::Metadata) -> Option<u64> {
    let modified = metadata.modified().ok()?;
    let dur = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Some(dur.as_millis() as u64)
}
