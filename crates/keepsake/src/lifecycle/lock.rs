//! Leases that keep scheduled jobs from overlapping
//!
//! A lease is granted for a key and a TTL. Holders release it when done; a
//! crashed holder's lease simply expires and the next caller takes it over.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{KeepsakeError, Result};
use crate::lifecycle::clock::{Clock, SystemClock};

/// A granted lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub key: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Lease TTL from configured seconds, capped at a year
pub fn lease_ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(365 * 86_400) as i64)
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Take `key` for `ttl`. `None` when someone else holds an unexpired lease.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>>;

    /// Give the lease back. Releasing a lease that was taken over is a no-op.
    async fn release(&self, lease: &LockLease) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Held {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// Process-local lock table.
///
/// Only excludes jobs inside one process; run the file provider when several
/// instances share a store.
pub struct InMemoryLockProvider {
    leases: DashMap<String, Held>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            clock,
        }
    }
}

impl Default for InMemoryLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let now = self.clock.now();
        let held = Held {
            token: Uuid::new_v4(),
            expires_at: now + ttl,
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at > now {
                    return Ok(None);
                }
                debug!("Taking over expired lease on {}", key);
                slot.insert(held);
            }
            Entry::Vacant(slot) => {
                slot.insert(held);
            }
        }

        Ok(Some(LockLease {
            key: key.to_string(),
            token: held.token,
            expires_at: held.expires_at,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        self.leases
            .remove_if(&lease.key, |_, held| held.token == lease.token);
        Ok(())
    }
}

/// Lease files in a shared directory.
///
/// Every read-modify-write of a lease runs under an OS lock on a sidecar
/// `.guard` file, and a lease is published by renaming a fully written temp
/// file over the lease path. The OS drops the guard lock when its holder
/// exits, so a crashed contender never wedges the key.
pub struct FileLockProvider {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    fn file_stem(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", Self::file_stem(key)))
    }

    fn guard_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.guard", Self::file_stem(key)))
    }
}

/// Open and exclusively lock the guard file; the lock lives as long as the handle
fn lock_guard(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| {
            KeepsakeError::Lock(format!("Failed to open guard {}: {}", path.display(), e))
        })?;
    file.lock().map_err(|e| {
        KeepsakeError::Lock(format!("Failed to lock guard {}: {}", path.display(), e))
    })?;
    Ok(file)
}

fn read_lease(path: &Path) -> Option<LockLease> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write to a temp file, then rename over `path`
fn publish(path: &Path, lease: &LockLease) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", lease.token));
    std::fs::write(&tmp, serde_json::to_vec(lease)?)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(KeepsakeError::Lock(format!(
            "Failed to publish lease {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

fn acquire_file(
    dir: &Path,
    path: &Path,
    guard: &Path,
    lease: LockLease,
    now: DateTime<Utc>,
) -> Result<Option<LockLease>> {
    std::fs::create_dir_all(dir).map_err(|e| {
        KeepsakeError::Lock(format!(
            "Failed to create lock directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    let _guard = lock_guard(guard)?;

    // Leases are only ever published whole, so an unreadable file is foreign
    // junk and counts as expired
    if let Some(current) = read_lease(path) {
        if current.expires_at > now {
            return Ok(None);
        }
        debug!("Taking over expired lease file {}", path.display());
    }

    publish(path, &lease)?;
    Ok(Some(lease))
}

fn release_file(path: &Path, guard: &Path, lease: &LockLease) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let _guard = lock_guard(guard)?;

    match read_lease(path) {
        Some(current) if current.token == lease.token => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeepsakeError::Lock(format!(
                "Failed to release lease {}: {}",
                path.display(),
                e
            ))),
        },
        _ => Ok(()),
    }
}

#[async_trait]
impl LockProvider for FileLockProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let now = self.clock.now();
        let lease = LockLease {
            key: key.to_string(),
            token: Uuid::new_v4(),
            expires_at: now + ttl,
        };
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let guard = self.guard_path_for(key);

        tokio::task::spawn_blocking(move || acquire_file(&dir, &path, &guard, lease, now))
            .await
            .map_err(|e| KeepsakeError::Lock(format!("Lease task failed: {}", e)))?
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let path = self.path_for(&lease.key);
        let guard = self.guard_path_for(&lease.key);
        let lease = lease.clone();

        tokio::task::spawn_blocking(move || release_file(&path, &guard, &lease))
            .await
            .map_err(|e| KeepsakeError::Lock(format!("Lease task failed: {}", e)))?
    }
}
