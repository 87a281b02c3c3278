//! Exclusive working-directory locks.
//!
//! A lock is a hidden marker file (`.metacoder.lock`) inside the guarded
//! directory, created with `create_new` so exactly one acquirer wins. Waiters
//! never write anything else into the directory; the holder's coder is free to
//! clean it while they poll.
//!
//! Markers left behind by crashed holders are reclaimed once they are older
//! than the staleness window, or immediately when they name a dead process on
//! this host.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{CoreError, Result};
use crate::metrics::LockMetrics;
use crate::obs;

/// Marker file name inside every guarded directory.
pub const LOCK_FILE_NAME: &str = ".metacoder.lock";

/// Timing controls for lock acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    /// Total time to wait for a held lock (milliseconds). 0 = fail fast.
    pub wait_budget_ms: u64,
    /// Delay between acquisition attempts (milliseconds).
    pub poll_interval_ms: u64,
    /// Age after which a marker is considered abandoned (milliseconds).
    pub stale_after_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_budget_ms: 30_000,
            poll_interval_ms: 50,
            stale_after_ms: 60 * 60 * 1000,
        }
    }
}

impl LockConfig {
    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.wait_budget_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Contents of a lock marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub token: String,
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn fresh() -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            host: local_host().to_string(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }
}

fn local_host() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

fn write_record(file: &mut fs::File, record: &LockRecord) -> Result<()> {
    file.write_all(&serde_json::to_vec(record)?)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness probe, only the age check applies.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

enum Attempt {
    Acquired(LockHandle),
    Held,
    Reclaimed,
}

/// Hands out [`LockHandle`]s for directories. Cheap to clone; clones share
/// counters.
#[derive(Debug, Clone)]
pub struct DirectoryLocker {
    config: LockConfig,
    metrics: Arc<LockMetrics>,
}

impl Default for DirectoryLocker {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl DirectoryLocker {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    /// Wait for exclusive ownership of `dir`.
    pub async fn acquire(&self, dir: &Path) -> Result<LockHandle> {
        self.acquire_cancellable(dir, &CancellationToken::new())
            .await
    }

    /// Wait for exclusive ownership of `dir`, giving up when `cancel` fires.
    ///
    /// Returns `LockTimeout` once the wait budget is spent; never returns a
    /// handle without holding the marker.
    pub async fn acquire_cancellable(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<LockHandle> {
        let started = Instant::now();
        let budget = self.config.wait_budget();

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::LockCancelled {
                    path: dir.to_path_buf(),
                });
            }

            match self.try_acquire(dir)? {
                Attempt::Acquired(handle) => {
                    obs::emit_lock_acquired(dir, started.elapsed().as_millis() as u64);
                    return Ok(handle);
                }
                Attempt::Reclaimed => continue,
                Attempt::Held => {}
            }

            let waited = started.elapsed();
            if waited >= budget {
                let waited_ms = waited.as_millis() as u64;
                self.metrics.inc_timed_out();
                obs::emit_lock_timeout(dir, waited_ms);
                return Err(CoreError::LockTimeout {
                    path: dir.to_path_buf(),
                    waited_ms,
                });
            }

            let pause = self.config.poll_interval().min(budget - waited);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CoreError::LockCancelled { path: dir.to_path_buf() });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Read the current marker of `dir`, if any.
    pub fn inspect(&self, dir: &Path) -> Result<Option<LockRecord>> {
        match fs::read(dir.join(LOCK_FILE_NAME)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_acquire(&self, dir: &Path) -> Result<Attempt> {
        let marker = dir.join(LOCK_FILE_NAME);
        let record = LockRecord::fresh();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return if self.reclaim_if_stale(dir, &marker)? {
                    Ok(Attempt::Reclaimed)
                } else {
                    Ok(Attempt::Held)
                };
            }
            Err(e) => return Err(e.into()),
        };

        // A reader may see the marker before the record lands; it treats an
        // unreadable marker by its mtime, which is fresh.
        if let Err(e) = write_record(&mut file, &record) {
            let _ = fs::remove_file(&marker);
            return Err(e);
        }

        self.metrics.inc_acquired();
        Ok(Attempt::Acquired(LockHandle {
            dir: dir.to_path_buf(),
            marker,
            token: record.token,
            held_since: Instant::now(),
            released: false,
            metrics: Arc::clone(&self.metrics),
        }))
    }

    /// Returns `true` when the slot was freed (by us or by its holder).
    fn reclaim_if_stale(&self, dir: &Path, marker: &Path) -> Result<bool> {
        let current = match fs::read(marker) {
            Ok(bytes) => serde_json::from_slice::<LockRecord>(&bytes).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let reason = match &current {
            Some(record) => match self.stale_reason(record) {
                Some(reason) => reason,
                None => return Ok(false),
            },
            // Markers are written whole, so an unreadable one is foreign or
            // corrupted; fall back to its modification time.
            None => {
                let age = fs::metadata(marker)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .unwrap_or_default();
                if age <= self.config.stale_after() {
                    return Ok(false);
                }
                "unreadable marker past staleness window"
            }
        };

        let tombstone = dir.join(format!("{LOCK_FILE_NAME}.stale-{}", Uuid::new_v4()));
        match fs::rename(marker, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        // Another acquirer may have swapped in a fresh marker between our read
        // and the rename. Put it back if so.
        let moved = fs::read(&tombstone)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok());
        let same = match (&current, &moved) {
            (Some(a), Some(b)) => a.token == b.token,
            (None, None) => true,
            _ => false,
        };
        if !same {
            if let Err(e) = fs::hard_link(&tombstone, marker) {
                if e.kind() != ErrorKind::AlreadyExists {
                    tracing::warn!(workdir = %dir.display(), error = %e, "failed to restore displaced lock marker");
                }
            }
            let _ = fs::remove_file(&tombstone);
            return Ok(false);
        }

        fs::remove_file(&tombstone)?;
        self.metrics.inc_reclaimed();
        obs::emit_lock_reclaimed(dir, current.as_ref().map(|r| r.pid), reason);
        Ok(true)
    }

    fn stale_reason(&self, record: &LockRecord) -> Option<&'static str> {
        if record.age() > self.config.stale_after() {
            return Some("marker older than staleness window");
        }
        if record.host == local_host() && !process_alive(record.pid) {
            return Some("holder process is gone");
        }
        None
    }
}

/// Exclusive ownership of one directory. Released on drop.
#[derive(Debug)]
pub struct LockHandle {
    dir: PathBuf,
    marker: PathBuf,
    token: String,
    held_since: Instant,
    released: bool,
    metrics: Arc<LockMetrics>,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Give up ownership. Idempotent.
    ///
    /// The marker is removed only while it still carries this handle's token;
    /// a marker that was reclaimed and re-acquired by someone else is left
    /// alone.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.metrics.inc_released();
        obs::emit_lock_released(&self.dir, self.held_since.elapsed().as_millis() as u64);

        let owned = match fs::read(&self.marker) {
            Ok(bytes) => serde_json::from_slice::<LockRecord>(&bytes)
                .map(|r| r.token == self.token)
                .unwrap_or(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !owned {
            tracing::warn!(workdir = %self.dir.display(), "lock marker now belongs to another holder; leaving it");
            return Ok(());
        }
        match fs::remove_file(&self.marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(workdir = %self.dir.display(), error = %e, "failed to release lock on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LockConfig {
        LockConfig {
            wait_budget_ms: 100,
            poll_interval_ms: 5,
            stale_after_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_acquire_writes_marker_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(fast_config());

        let mut handle = locker.acquire(dir.path()).await.unwrap();
        let record = locker.inspect(dir.path()).unwrap().unwrap();
        assert_eq!(record.token, handle.token());
        assert_eq!(record.pid, std::process::id());

        handle.release().unwrap();
        assert!(locker.inspect(dir.path()).unwrap().is_none());
        assert_eq!(locker.metrics().acquired(), 1);
        assert_eq!(locker.metrics().released(), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(fast_config());
        let mut handle = locker.acquire(dir.path()).await.unwrap();
        handle.release().unwrap();
        handle.release().unwrap();
        drop(handle);
        assert_eq!(locker.metrics().released(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(LockConfig {
            wait_budget_ms: 0,
            ..fast_config()
        });
        let _held = locker.acquire(dir.path()).await.unwrap();
        let err = locker.acquire(dir.path()).await.unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert_eq!(locker.metrics().timed_out(), 1);
    }

    #[tokio::test]
    async fn test_dead_pid_marker_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(fast_config());
        let ghost = LockRecord {
            token: "ghost".into(),
            pid: u32::MAX - 1,
            host: local_host().to_string(),
            acquired_at: Utc::now(),
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&ghost).unwrap(),
        )
        .unwrap();

        let handle = locker.acquire(dir.path()).await.unwrap();
        assert_ne!(handle.token(), "ghost");
        assert_eq!(locker.metrics().reclaimed(), 1);
    }

    #[tokio::test]
    async fn test_foreign_host_marker_not_reclaimed_before_window() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(fast_config());
        let other = LockRecord {
            token: "remote".into(),
            pid: u32::MAX - 1,
            host: "some-other-host.invalid".into(),
            acquired_at: Utc::now(),
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&other).unwrap(),
        )
        .unwrap();

        let err = locker.acquire(dir.path()).await.unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert_eq!(locker.inspect(dir.path()).unwrap().unwrap().token, "remote");
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_marker() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(fast_config());
        let mut handle = locker.acquire(dir.path()).await.unwrap();

        let usurper = LockRecord {
            token: "usurper".into(),
            ..LockRecord::fresh()
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&usurper).unwrap(),
        )
        .unwrap();

        handle.release().unwrap();
        assert_eq!(locker.inspect(dir.path()).unwrap().unwrap().token, "usurper");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DirectoryLocker::new(LockConfig {
            wait_budget_ms: 10_000,
            ..fast_config()
        });
        let _held = locker.acquire(dir.path()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = locker
            .acquire_cancellable(dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockCancelled { .. }));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let locker = DirectoryLocker::new(fast_config());
        let err = locker
            .try_acquire(Path::new("/definitely/not/a/real/dir/metacoder"))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
