//! Single-instance guard backed by an advisory file lock.
//!
//! The lock file lives in the user's configuration directory and carries the
//! holder's pid and acquisition time. When the lock cannot be taken, a
//! holder record older than the stale window is treated as the residue of an
//! abnormal termination: the file is removed and the lock retried once.
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{constants::STALE_LOCK_WINDOW, error::LockError};

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    acquired_at: f64,
}

/// Holds the instance lock for the lifetime of the process.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

/// Outcome of an acquisition attempt.
pub enum LockOutcome {
    /// This process now holds the lock.
    Acquired(InstanceLock),
    /// Another live instance holds the lock.
    HeldByOther {
        /// The holder's pid, when the payload was readable.
        pid: Option<u32>,
    },
}

impl InstanceLock {
    /// Attempts to take the instance lock at `path`.
    pub fn acquire(path: &Path) -> Result<LockOutcome, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::try_take(path)? {
            Some(lock) => Ok(LockOutcome::Acquired(lock)),
            None => {
                let payload = read_payload(path);
                if payload_is_stale(payload.as_ref()) {
                    warn!(
                        "Removing stale instance lock at {} (holder pid {:?})",
                        path.display(),
                        payload.as_ref().map(|p| p.pid)
                    );
                    let _ = fs::remove_file(path);
                    if let Some(lock) = Self::try_take(path)? {
                        return Ok(LockOutcome::Acquired(lock));
                    }
                }
                Ok(LockOutcome::HeldByOther {
                    pid: payload.map(|p| p.pid),
                })
            }
        }
    }

    fn try_take(path: &Path) -> Result<Option<InstanceLock>, LockError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let payload = LockPayload {
            pid: unsafe { libc::getpid() } as u32,
            acquired_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let data = serde_json::to_string(&payload).map_err(std::io::Error::other)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;

        info!("Instance lock acquired at {}", path.display());
        Ok(Some(InstanceLock {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
        debug!("Instance lock released: {}", self.path.display());
    }
}

fn read_payload(path: &Path) -> Option<LockPayload> {
    let mut file = File::open(path).ok()?;
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    serde_json::from_str(&raw).ok()
}

/// A lock whose payload is unreadable or older than the stale window can be
/// reclaimed.
fn payload_is_stale(payload: Option<&LockPayload>) -> bool {
    let Some(payload) = payload else {
        return true;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    now - payload.acquired_at > STALE_LOCK_WINDOW.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_in_same_process_sees_holder() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bindkit.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        let LockOutcome::Acquired(lock) = first else {
            panic!("expected to acquire");
        };

        // fs2 locks are per-handle even within one process.
        match InstanceLock::acquire(&path).unwrap() {
            LockOutcome::HeldByOther { pid } => {
                assert_eq!(pid, Some(unsafe { libc::getpid() } as u32));
            }
            LockOutcome::Acquired(_) => {
                // Some platforms grant re-entrant locks to the same process;
                // either outcome is acceptable there.
            }
        }

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn released_lock_can_be_reacquired() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bindkit.lock");

        {
            let outcome = InstanceLock::acquire(&path).unwrap();
            assert!(matches!(outcome, LockOutcome::Acquired(_)));
        }
        let outcome = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
    }

    #[test]
    fn unreadable_payload_counts_as_stale() {
        assert!(payload_is_stale(None));
        let fresh = LockPayload {
            pid: 1,
            acquired_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs_f64(),
        };
        assert!(!payload_is_stale(Some(&fresh)));

        let old = LockPayload {
            pid: 1,
            acquired_at: 1.0,
        };
        assert!(payload_is_stale(Some(&old)));
    }
}
