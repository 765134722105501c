//! Cross-process lock guarding one cache slot.
//!
//! The lock is the file `<store>/.lock.<base_name>`, created atomically.
//! Waiters poll for it to disappear and then race on `create_new` again, so
//! exactly one of them proceeds.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GoSdkError, Result};

/// Delay between attempts to take a busy lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a waiter reports that it is still blocked.
pub const LOCK_WARN_INTERVAL: Duration = Duration::from_secs(15);

/// Attempts made to delete the lock file on release.
pub const LOCK_RELEASE_ATTEMPTS: u32 = 20;

/// Lock files created by this process and not yet released.
static HELD_LOCKS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

fn held_locks() -> std::sync::MutexGuard<'static, BTreeSet<PathBuf>> {
    HELD_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Options controlling how long [`SlotLock::acquire`] may wait.
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Give up with [`GoSdkError::LockWaitExceeded`] after this long.
    pub max_wait: Option<Duration>,
}

/// Exclusive hold on a cache slot.
///
/// Call [`SlotLock::release`] when done; dropping the guard removes the
/// lock file as a fallback.
#[derive(Debug)]
pub struct SlotLock {
    path: PathBuf,
    released: bool,
}

impl SlotLock {
    /// Path of the lock file for `base_name`.
    pub fn lock_path(store: &Path, base_name: &str) -> PathBuf {
        store.join(format!(".lock.{}", base_name))
    }

    /// Waits until the slot lock can be created.
    ///
    /// # Errors
    ///
    /// - [`GoSdkError::Interrupted`] if `cancel` fires while waiting.
    /// - [`GoSdkError::LockWaitExceeded`] once `options.max_wait` elapses.
    /// - [`GoSdkError::Io`] if the lock file cannot be created for any
    ///   reason other than already existing.
    pub async fn acquire(
        store: &Path,
        base_name: &str,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let path = Self::lock_path(store, base_name);
        let started = Instant::now();
        let mut last_warning = started;
        let mut reported_wait = false;

        loop {
            match try_create(&path).await {
                Ok(()) => {
                    held_locks().insert(path.clone());
                    debug!("Locked {}", path.display());
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(GoSdkError::io(&path, e)),
            }

            if !reported_wait {
                info!("Waiting for lock {}", path.display());
                reported_wait = true;
            }

            let waited = started.elapsed();
            if let Some(max_wait) = options.max_wait {
                if waited >= max_wait {
                    return Err(GoSdkError::LockWaitExceeded { path, waited });
                }
            }
            if last_warning.elapsed() >= LOCK_WARN_INTERVAL {
                warn!(
                    "Still waiting for lock {} ({}s)",
                    path.display(),
                    waited.as_secs()
                );
                last_warning = Instant::now();
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GoSdkError::Interrupted(format!(
                        "waiting for lock {}",
                        path.display()
                    )));
                }
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
            }
        }
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock file, retrying on the poll schedule.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Io`] with the last deletion error once
    /// [`LOCK_RELEASE_ATTEMPTS`] are used up.
    pub async fn release(mut self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Lock {} disappeared before release", self.path.display());
                    break;
                }
                Err(e) if attempt >= LOCK_RELEASE_ATTEMPTS => {
                    self.released = true;
                    held_locks().remove(&self.path);
                    return Err(GoSdkError::io(&self.path, e));
                }
                Err(e) => {
                    debug!(
                        "Can't delete lock {} (attempt {}): {}",
                        self.path.display(),
                        attempt,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
            }
        }

        self.released = true;
        held_locks().remove(&self.path);
        debug!("Unlocked {}", self.path.display());
        Ok(())
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        held_locks().remove(&self.path);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Can't delete lock {}: {}", self.path.display(), e);
            }
        }
    }
}

async fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    // Owner pid, for humans inspecting a stuck lock.
    file.write_all(std::process::id().to_string().as_bytes())
        .await?;
    file.flush().await
}

/// Deletes every lock file this process still holds.
///
/// Called on interrupt and at exit. Returns the number of files removed.
pub fn release_abandoned_locks() -> usize {
    release_held_matching(|_| true)
}

fn release_held_matching(filter: impl Fn(&Path) -> bool) -> usize {
    let abandoned: Vec<PathBuf> = {
        let mut held = held_locks();
        let selected: Vec<PathBuf> = held.iter().filter(|p| filter(p)).cloned().collect();
        for path in &selected {
            held.remove(path);
        }
        selected
    };

    let mut removed = 0;
    for path in abandoned {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                warn!("Released abandoned lock {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Can't release abandoned lock {}: {}", path.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        let lock = SlotLock::acquire(temp_dir.path(), "go1.22.1.linux-amd64", &LockOptions::default(), &cancel)
            .await
            .unwrap();
        let path = temp_dir.path().join(".lock.go1.22.1.linux-amd64");
        assert_eq!(lock.path(), path.as_path());
        assert!(path.is_file());

        lock.release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_max_wait_exceeded() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let _held = SlotLock::acquire(temp_dir.path(), "sdk", &LockOptions::default(), &cancel)
            .await
            .unwrap();

        let options = LockOptions {
            max_wait: Some(Duration::from_millis(250)),
        };
        let err = SlotLock::acquire(temp_dir.path(), "sdk", &options, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GoSdkError::LockWaitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let _held = SlotLock::acquire(temp_dir.path(), "sdk", &LockOptions::default(), &cancel)
            .await
            .unwrap();

        let waiter_cancel = CancellationToken::new();
        let trigger = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let err = SlotLock::acquire(temp_dir.path(), "sdk", &LockOptions::default(), &waiter_cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GoSdkError::Interrupted(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_proceeds_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().to_path_buf();
        let cancel = CancellationToken::new();

        let first = SlotLock::acquire(&store, "sdk", &LockOptions::default(), &cancel)
            .await
            .unwrap();
        let first_released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let store = store.clone();
            let cancel = cancel.clone();
            let first_released = first_released.clone();
            tokio::spawn(async move {
                let lock = SlotLock::acquire(&store, "sdk", &LockOptions::default(), &cancel)
                    .await
                    .unwrap();
                assert!(first_released.load(Ordering::SeqCst));
                lock.release().await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        first_released.store(true, Ordering::SeqCst);
        first.release().await.unwrap();

        waiter.await.unwrap();
        assert!(!SlotLock::lock_path(&store, "sdk").exists());
    }

    #[tokio::test]
    async fn test_drop_removes_lock() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let path = {
            let lock = SlotLock::acquire(temp_dir.path(), "sdk", &LockOptions::default(), &cancel)
                .await
                .unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_abandoned() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let lock = SlotLock::acquire(temp_dir.path(), "sdk", &LockOptions::default(), &cancel)
            .await
            .unwrap();
        let path = lock.path().to_path_buf();
        std::mem::forget(lock);

        let root = temp_dir.path().to_path_buf();
        assert_eq!(release_held_matching(|p| p.starts_with(&root)), 1);
        assert!(!path.exists());
        assert_eq!(release_held_matching(|p| p.starts_with(&root)), 0);
    }
}
