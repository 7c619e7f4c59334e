//! `SpoolStore`: the append-only, single-writer, crash-safe, capacity-capped
//! log (§4.2).

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use peac_core::{SpoolEntry, genesis_digest};
use peac_error::{CorruptReason, SpoolCapUnit, SpoolError};

use peac_config::SpoolConfig;

use crate::lock::LockGuard;
use crate::meta::SpoolMeta;
use crate::scan::scan_file;

/// Whether a store will still accept writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolState {
    /// Accepting appends.
    Active,
    /// A cap tripped or corruption was found; further appends are refused.
    ReadOnly,
}

/// Non-fatal condition surfaced while opening or operating a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpoolWarning {
    /// The tail of the log file was truncated back to the last complete,
    /// chain-valid entry (an interrupted write, not corruption).
    IncompleteTailTruncated {
        /// Sequence of the last entry kept.
        sequence_after: u64,
    },
    /// The `.meta.json` sidecar did not match the log file and a full scan
    /// was performed instead of the fast path.
    MetaFileMismatch,
    /// A stale lock held by `holder_pid` was broken to acquire the store.
    StaleLockBroken {
        /// PID recorded in the broken lock, if parseable.
        holder_pid: Option<u32>,
    },
}

/// Callback invoked for each [`SpoolWarning`] raised by a store.
pub type WarningSink = Arc<dyn Fn(SpoolWarning) + Send + Sync>;

/// Why a store transitioned to [`SpoolState::ReadOnly`], kept so a
/// subsequent append can report the matching error instead of a generic one.
#[derive(Debug, Clone, Copy)]
enum ReadOnlyCause {
    Cap { unit: SpoolCapUnit, current: u64, max: u64 },
    Corrupt { reason: CorruptReason, at_sequence: Option<u64> },
}

/// The tamper-evident, crash-safe, single-writer append-only spool (§4.2).
pub struct SpoolStore {
    path: PathBuf,
    config: SpoolConfig,
    file: File,
    lock: LockGuard,
    head_digest: String,
    sequence: u64,
    entry_count: u64,
    file_bytes: u64,
    state: SpoolState,
    read_only_cause: Option<ReadOnlyCause>,
    on_warning: Option<WarningSink>,
    closed: bool,
}

impl SpoolStore {
    /// Open (creating if absent) the spool log at `config.file_path`,
    /// acquiring the single-writer lock, then recovering state either from
    /// a fresh `.meta.json` sidecar or a full streaming scan (§4.2 Startup).
    pub fn open(
        config: SpoolConfig,
        on_warning: Option<WarningSink>,
    ) -> Result<Self, SpoolError> {
        config
            .validate()
            .map_err(|e| SpoolError::Corrupt {
                reason: CorruptReason::MalformedJson,
                corrupt_at_sequence: None,
                details: Some(e.message.clone()),
            })?;

        let path = PathBuf::from(&config.file_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
        }

        let (lock, broke_stale) = LockGuard::acquire(
            &path,
            config.allow_stale_lock_break,
            config.stale_lock_max_age_ms,
        )?;
        if broke_stale {
            emit(&on_warning, SpoolWarning::StaleLockBroken { holder_pid: None });
        }

        let meta = SpoolMeta::load(&path).filter(|m| m.is_fresh(&path));
        let (head_digest, sequence, entry_count, mut state) = if let Some(meta) = meta {
            (meta.head_digest, meta.sequence, meta.entry_count, SpoolState::Active)
        } else {
            if SpoolMeta::load(&path).is_some() {
                emit(&on_warning, SpoolWarning::MetaFileMismatch);
            }
            let outcome = scan_file(&path, config.max_line_bytes)?;
            let entry_count = outcome.entries.len() as u64;
            let (head_digest, sequence) = outcome
                .entries
                .last()
                .map(|e| (e.entry_digest.clone(), e.sequence))
                .unwrap_or((genesis_digest(), 0));

            let state = SpoolState::Active;
            if let Some(corruption) = outcome.corruption {
                return Err(build_open_corrupt_err(
                    path,
                    lock,
                    corruption.reason,
                    corruption.at_sequence,
                    corruption.details,
                    SpoolState::ReadOnly,
                ));
            } else if outcome.valid_up_to_byte < std::fs::metadata(&path)?.len() {
                // Trailing bytes past the last valid entry with no reported
                // corruption only happens for an unterminated tail.
                truncate_to(&path, outcome.valid_up_to_byte)?;
                emit(
                    &on_warning,
                    SpoolWarning::IncompleteTailTruncated { sequence_after: sequence },
                );
            }
            (head_digest, sequence, entry_count, state)
        };

        let file_bytes = std::fs::metadata(&path)?.len();
        let mut read_only_cause = None;
        if let Some(max_entries) = config.max_entries {
            if entry_count >= max_entries {
                state = SpoolState::ReadOnly;
                read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Entries,
                    current: entry_count,
                    max: max_entries,
                });
            }
        }
        if let Some(max_bytes) = config.max_file_bytes {
            if file_bytes >= max_bytes {
                state = SpoolState::ReadOnly;
                read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Bytes,
                    current: file_bytes,
                    max: max_bytes,
                });
            }
        }

        let file = OpenOptions::new().append(true).open(&path)?;

        let store = Self {
            path,
            config,
            file,
            lock,
            head_digest,
            sequence,
            entry_count,
            file_bytes,
            state,
            read_only_cause,
            on_warning,
            closed: false,
        };
        store.write_meta()?;
        Ok(store)
    }

    /// Append `entry` to the log. Revalidates linkage against the store's
    /// current head (defence against a caller building an entry from a
    /// stale head) and enforces hard caps before writing a single line.
    pub fn append(&mut self, entry: SpoolEntry) -> Result<(), SpoolError> {
        if self.state != SpoolState::Active {
            return Err(match self.read_only_cause {
                Some(ReadOnlyCause::Corrupt { reason, at_sequence }) => SpoolError::Corrupt {
                    reason,
                    corrupt_at_sequence: at_sequence,
                    details: None,
                },
                Some(ReadOnlyCause::Cap { unit, current, max }) => {
                    SpoolError::Full { current, max, unit }
                }
                None => SpoolError::Full {
                    current: self.entry_count,
                    max: self.config.max_entries.unwrap_or(self.entry_count),
                    unit: SpoolCapUnit::Entries,
                },
            });
        }

        let links_ok = if self.sequence == 0 {
            entry.is_valid_genesis()
        } else {
            entry.sequence == self.sequence + 1 && entry.prev_entry_digest == self.head_digest
        };
        if !links_ok || !entry.digest_is_self_consistent() {
            self.state = SpoolState::ReadOnly;
            self.read_only_cause = Some(ReadOnlyCause::Corrupt {
                reason: CorruptReason::ChainBroken,
                at_sequence: Some(entry.sequence),
            });
            return Err(SpoolError::Corrupt {
                reason: CorruptReason::ChainBroken,
                corrupt_at_sequence: Some(entry.sequence),
                details: Some("append does not chain after current head".to_string()),
            });
        }

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        if line.len() as u64 > self.config.max_line_bytes {
            return Err(SpoolError::Corrupt {
                reason: CorruptReason::LineTooLarge,
                corrupt_at_sequence: Some(entry.sequence),
                details: Some(format!(
                    "serialized entry ({} bytes) exceeds max_line_bytes ({})",
                    line.len(),
                    self.config.max_line_bytes
                )),
            });
        }

        let prospective_entries = self.entry_count + 1;
        let prospective_bytes = self.file_bytes + line.len() as u64;
        if let Some(max_entries) = self.config.max_entries {
            if prospective_entries > max_entries {
                self.state = SpoolState::ReadOnly;
                self.read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Entries,
                    current: self.entry_count,
                    max: max_entries,
                });
                return Err(SpoolError::Full {
                    current: self.entry_count,
                    max: max_entries,
                    unit: SpoolCapUnit::Entries,
                });
            }
        }
        if let Some(max_bytes) = self.config.max_file_bytes {
            if prospective_bytes > max_bytes {
                self.state = SpoolState::ReadOnly;
                self.read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Bytes,
                    current: self.file_bytes,
                    max: max_bytes,
                });
                return Err(SpoolError::Full {
                    current: self.file_bytes,
                    max: max_bytes,
                    unit: SpoolCapUnit::Bytes,
                });
            }
        }

        self.file.write_all(line.as_bytes())?;
        self.head_digest = entry.entry_digest.clone();
        self.sequence = entry.sequence;
        self.entry_count = prospective_entries;
        self.file_bytes = prospective_bytes;

        if let Some(max_entries) = self.config.max_entries {
            if prospective_entries == max_entries {
                self.state = SpoolState::ReadOnly;
                self.read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Entries,
                    current: prospective_entries,
                    max: max_entries,
                });
            }
        }
        if let Some(max_bytes) = self.config.max_file_bytes {
            if prospective_bytes == max_bytes {
                self.state = SpoolState::ReadOnly;
                self.read_only_cause = Some(ReadOnlyCause::Cap {
                    unit: SpoolCapUnit::Bytes,
                    current: prospective_bytes,
                    max: max_bytes,
                });
            }
        }

        Ok(())
    }

    /// Flush to durable storage and rewrite the meta sidecar (§4.2 Commit).
    pub fn commit(&self) -> Result<(), SpoolError> {
        self.file.sync_all()?;
        self.write_meta()
    }

    /// Stream entries from `from_sequence` (inclusive), re-validating
    /// `max_line_bytes` on read just as on write, up to `limit` entries.
    pub fn read(
        &self,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<SpoolEntry>, SpoolError> {
        let outcome = scan_file(&self.path, self.config.max_line_bytes)?;
        let mut entries: Vec<SpoolEntry> = outcome
            .entries
            .into_iter()
            .filter(|e| e.sequence >= from_sequence)
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Current chain head digest (genesis if the spool is empty).
    pub fn head_digest(&self) -> &str {
        &self.head_digest
    }

    /// Current sequence number (0 if empty).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the store is still accepting appends.
    pub fn state(&self) -> SpoolState {
        self.state
    }

    /// Number of entries persisted so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Current size of the log file in bytes.
    pub fn file_bytes(&self) -> u64 {
        self.file_bytes
    }

    /// Entry cap configured for this store, if any.
    pub fn max_entries(&self) -> Option<u64> {
        self.config.max_entries
    }

    /// Byte cap configured for this store, if any.
    pub fn max_file_bytes(&self) -> Option<u64> {
        self.config.max_file_bytes
    }

    /// Release the lock and mark this store closed. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.lock.release();
            self.closed = true;
        }
    }

    fn write_meta(&self) -> Result<(), SpoolError> {
        let metadata = std::fs::metadata(&self.path)?;
        let mtime_ms = crate::meta::mtime_millis(&metadata).unwrap_or(0);
        let meta = SpoolMeta {
            meta_version: crate::meta::META_VERSION,
            sequence: self.sequence,
            head_digest: self.head_digest.clone(),
            entry_count: self.entry_count,
            file_bytes: metadata.len(),
            mtime_ms,
        };
        meta.write_atomic(&self.path)
    }
}

impl Drop for SpoolStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn emit(sink: &Option<WarningSink>, warning: SpoolWarning) {
    if let Some(sink) = sink {
        sink(warning);
    }
    tracing::warn!(?warning, "spool warning");
}

impl std::fmt::Debug for SpoolWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteTailTruncated { sequence_after } => f
                .debug_struct("IncompleteTailTruncated")
                .field("sequence_after", sequence_after)
                .finish(),
            Self::MetaFileMismatch => write!(f, "MetaFileMismatch"),
            Self::StaleLockBroken { holder_pid } => f
                .debug_struct("StaleLockBroken")
                .field("holder_pid", holder_pid)
                .finish(),
        }
    }
}

fn truncate_to(path: &std::path::Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)
}

fn build_open_corrupt_err(
    path: PathBuf,
    mut lock: LockGuard,
    reason: CorruptReason,
    at_sequence: u64,
    details: String,
    _state: SpoolState,
) -> SpoolError {
    // The store never came into being; release the lock we just took so a
    // subsequent open (e.g. for diagnostics) is not itself blocked.
    lock.release();
    let _ = path;
    SpoolError::Corrupt {
        reason,
        corrupt_at_sequence: Some(at_sequence),
        details: Some(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peac_core::{CapturedAction, EntrySkeleton};
    use std::collections::BTreeMap;

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

    fn config(path: &std::path::Path) -> SpoolConfig {
        SpoolConfig::new(path.to_string_lossy().to_string())
    }

    #[test]
    fn open_creates_empty_spool_at_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        assert_eq!(store.sequence(), 0);
        assert_eq!(store.head_digest(), genesis_digest());
        assert_eq!(store.state(), SpoolState::Active);
        store.close();
    }

    #[test]
    fn append_then_reopen_recovers_via_meta_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        {
            let mut store = SpoolStore::open(config(&path), None).unwrap();
            let a = action("a1");
            let entry = EntrySkeleton::for_action(&a, None, None, store.head_digest(), store.sequence())
                .finish()
                .unwrap();
            store.append(entry).unwrap();
            store.commit().unwrap();
        }
        let store = SpoolStore::open(config(&path), None).unwrap();
        assert_eq!(store.sequence(), 1);
    }

    #[test]
    fn append_rejects_entry_not_chained_to_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        let a = action("a1");
        let bogus = EntrySkeleton::for_action(&a, None, None, "deadbeef", 5)
            .finish()
            .unwrap();
        let err = store.append(bogus).unwrap_err();
        assert!(matches!(err, SpoolError::Corrupt { .. }));
        assert_eq!(store.state(), SpoolState::ReadOnly);
    }

    #[test]
    fn max_entries_cap_trips_to_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut cfg = config(&path);
        cfg.max_entries = Some(1);
        let mut store = SpoolStore::open(cfg, None).unwrap();
        let a1 = action("a1");
        let e1 = EntrySkeleton::for_action(&a1, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        store.append(e1).unwrap();
        assert_eq!(store.state(), SpoolState::ReadOnly);

        let a2 = action("a2");
        let e2 = EntrySkeleton::for_action(&a2, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        let err = store.append(e2).unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Full { unit: SpoolCapUnit::Entries, .. }
        ));
    }

    #[test]
    fn read_streams_entries_from_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        for i in 0..3 {
            let a = action(&format!("a{i}"));
            let e = EntrySkeleton::for_action(&a, None, None, store.head_digest(), store.sequence())
                .finish()
                .unwrap();
            store.append(e).unwrap();
        }
        store.commit().unwrap();
        let all = store.read(1, None).unwrap();
        assert_eq!(all.len(), 3);
        let from_two = store.read(2, None).unwrap();
        assert_eq!(from_two.len(), 2);
        assert_eq!(from_two[0].sequence, 2);
    }

    #[test]
    fn entry_count_and_file_bytes_track_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.file_bytes(), 0);
        let a = action("a1");
        let e = EntrySkeleton::for_action(&a, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        store.append(e).unwrap();
        assert_eq!(store.entry_count(), 1);
        assert!(store.file_bytes() > 0);
    }

    #[test]
    fn reopen_while_locked_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let _store = SpoolStore::open(config(&path), None).unwrap();
        let err = SpoolStore::open(config(&path), None).unwrap_err();
        assert!(matches!(err, SpoolError::Lockfile { .. }));
    }

    #[test]
    fn close_releases_lock_for_next_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        store.close();
        let _store2 = SpoolStore::open(config(&path), None).unwrap();
    }

    #[test]
    fn oversized_line_marks_spool_corrupt_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        {
            let mut store = SpoolStore::open(config(&path), None).unwrap();
            let a = action("a1");
            let e = EntrySkeleton::for_action(&a, None, None, store.head_digest(), store.sequence())
                .finish()
                .unwrap();
            store.append(e).unwrap();
            store.commit().unwrap();
        }
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(&vec![b'x'; 8192]);
        content.push(b'\n');
        std::fs::write(&path, &content).unwrap();
        std::fs::remove_file(SpoolMeta::path_for(&path)).ok();

        let mut cfg = config(&path);
        cfg.max_line_bytes = 1024;
        let err = SpoolStore::open(cfg, None).unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Corrupt { reason: CorruptReason::LineTooLarge, .. }
        ));
    }

    #[test]
    fn max_file_bytes_cap_trips_to_read_only_with_bytes_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut cfg = config(&path);
        cfg.max_file_bytes = Some(1);
        let mut store = SpoolStore::open(cfg, None).unwrap();
        let a1 = action("a1");
        let e1 = EntrySkeleton::for_action(&a1, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        let err = store.append(e1).unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Full { unit: SpoolCapUnit::Bytes, .. }
        ));
        assert_eq!(store.state(), SpoolState::ReadOnly);

        let a2 = action("a2");
        let e2 = EntrySkeleton::for_action(&a2, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        let err = store.append(e2).unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Full { unit: SpoolCapUnit::Bytes, .. }
        ));
    }

    #[test]
    fn append_to_corrupt_store_reports_corrupt_not_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        let mut store = SpoolStore::open(config(&path), None).unwrap();
        let a = action("a1");
        let bogus = EntrySkeleton::for_action(&a, None, None, "deadbeef", 5)
            .finish()
            .unwrap();
        store.append(bogus).unwrap_err();
        assert_eq!(store.state(), SpoolState::ReadOnly);

        let a2 = action("a2");
        let e2 = EntrySkeleton::for_action(&a2, None, None, store.head_digest(), store.sequence())
            .finish()
            .unwrap();
        let err = store.append(e2).unwrap_err();
        assert!(matches!(
            err,
            SpoolError::Corrupt { reason: CorruptReason::ChainBroken, .. }
        ));
    }

    #[test]
    fn incomplete_tail_is_truncated_and_store_stays_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ndjson");
        {
            let mut store = SpoolStore::open(config(&path), None).unwrap();
            let a = action("a1");
            let e = EntrySkeleton::for_action(&a, None, None, store.head_digest(), store.sequence())
                .finish()
                .unwrap();
            store.append(e).unwrap();
            store.commit().unwrap();
        }
        // Simulate a crash mid-write of the next line, and make the meta
        // sidecar stale so the reopen takes the full-scan path.
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(br#"{"partial":tr"#);
        std::fs::write(&path, &content).unwrap();
        std::fs::remove_file(SpoolMeta::path_for(&path)).ok();

        let warnings = std::sync::Mutex::new(Vec::new());
        let warnings_ref = std::sync::Arc::new(warnings);
        let sink_warnings = warnings_ref.clone();
        let sink: WarningSink = Arc::new(move |w| sink_warnings.lock().unwrap().push(w));
        let store = SpoolStore::open(config(&path), Some(sink)).unwrap();
        assert_eq!(store.state(), SpoolState::Active);
        assert_eq!(store.sequence(), 1);
        assert!(
            warnings_ref
                .lock()
                .unwrap()
                .iter()
                .any(|w| matches!(w, SpoolWarning::IncompleteTailTruncated { .. }))
        );
    }
}
