//! Single-writer `<spool>.lock` sidecar (§4.2 "Single-writer lock").

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use peac_error::SpoolError;

/// Payload written into the `.lock` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    /// PID of the process holding the lock.
    pub pid: u32,
    /// Process start time, in milliseconds since the epoch (best-effort; used
    /// only to disambiguate PID reuse across reboots, not enforced).
    pub start_time: u64,
    /// Best-effort hostname of the holder.
    pub hostname: String,
    /// When the lock was created, in milliseconds since the epoch.
    pub created_at: u64,
}

impl LockPayload {
    fn now() -> Self {
        let now_ms = now_millis();
        Self {
            pid: std::process::id(),
            start_time: now_ms,
            hostname: hostname(),
            created_at: now_ms,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// An acquired, held lock. Dropping this does *not* release the lock —
/// callers must call [`LockGuard::release`] explicitly (mirroring
/// [`crate::store::SpoolStore::close`]'s idempotent, explicit-release contract).
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the underlying `.lock` sidecar for a spool log path.
    pub fn path_for(spool_path: &Path) -> PathBuf {
        let mut s = spool_path.as_os_str().to_owned();
        s.push(".lock");
        PathBuf::from(s)
    }

    /// Acquire the lock by exclusive-create. On an existing lock: if
    /// `allow_stale_break` is set and the held lock's `created_at` is older
    /// than `stale_max_age_ms`, break it and retry once; otherwise fail with
    /// [`SpoolError::Lockfile`] naming the holder PID when parseable.
    ///
    /// Returns `(guard, broke_stale)` so callers can emit a warning.
    pub fn acquire(
        spool_path: &Path,
        allow_stale_break: bool,
        stale_max_age_ms: Option<u64>,
    ) -> Result<(Self, bool), SpoolError> {
        let lock_path = Self::path_for(spool_path);
        match create_exclusive(&lock_path) {
            Ok(()) => Ok((
                Self {
                    path: lock_path,
                    released: false,
                },
                false,
            )),
            Err(_) => {
                let holder_pid = std::fs::read_to_string(&lock_path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<LockPayload>(&s).ok())
                    .map(|p| p.pid);

                if allow_stale_break {
                    let holder = std::fs::read_to_string(&lock_path)
                        .ok()
                        .and_then(|s| serde_json::from_str::<LockPayload>(&s).ok());
                    let max_age = stale_max_age_ms.unwrap_or(u64::MAX);
                    let is_stale = holder
                        .map(|h| now_millis().saturating_sub(h.created_at) > max_age)
                        .unwrap_or(false);
                    if is_stale {
                        let _ = std::fs::remove_file(&lock_path);
                        create_exclusive(&lock_path).map_err(|e| SpoolError::Io(e))?;
                        return Ok((
                            Self {
                                path: lock_path,
                                released: false,
                            },
                            true,
                        ));
                    }
                }

                Err(SpoolError::Lockfile {
                    lock_path: lock_path.display().to_string(),
                    holder_pid,
                })
            }
        }
    }

    /// Release the lock. Idempotent — calling twice is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

fn create_exclusive(lock_path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    let payload = LockPayload::now();
    let json = serde_json::to_string(&payload).unwrap_or_default();
    file.write_all(json.as_bytes())?;
    Ok(())
}
