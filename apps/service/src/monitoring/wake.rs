//! Wake assertions keep the machine from suspending while a tick runs.
//!
//! An assertion is a [`WakeGuard`]: it is released exactly once, either
//! when the guard drops or when its ceiling elapses, whichever is first.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source of wake assertions
pub trait WakeLock: Send + Sync {
    /// Take an assertion named `tag`. With a ceiling the assertion is
    /// force-released after that long even if the guard is still alive.
    fn acquire(&self, tag: &str, ceiling: Option<Duration>) -> WakeGuard;
}

struct GuardInner {
    tag: String,
    released: AtomicBool,
    release: Box<dyn Fn(&str) + Send + Sync>,
    ceiling_timer: Mutex<Option<JoinHandle<()>>>,
}

impl GuardInner {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.release)(&self.tag);
        true
    }
}

/// Scoped wake assertion
pub struct WakeGuard {
    inner: Arc<GuardInner>,
}

impl WakeGuard {
    /// Build a guard that calls `release` once. Implementations of
    /// [`WakeLock`] construct their guards through this.
    pub fn new(
        tag: &str,
        ceiling: Option<Duration>,
        release: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(GuardInner {
            tag: tag.to_string(),
            released: AtomicBool::new(false),
            release: Box::new(release),
            ceiling_timer: Mutex::new(None),
        });

        if let Some(ceiling) = ceiling {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let timer_inner = Arc::clone(&inner);
                    let timer = handle.spawn(async move {
                        tokio::time::sleep(ceiling).await;
                        if timer_inner.release() {
                            warn!(
                                "Wake assertion '{}' hit its {:?} ceiling and was force-released",
                                timer_inner.tag, ceiling
                            );
                        }
                    });
                    if let Ok(mut slot) = inner.ceiling_timer.lock() {
                        *slot = Some(timer);
                    }
                }
                Err(_) => {
                    debug!("No runtime for wake ceiling timer on '{}'", tag);
                }
            }
        }

        Self { inner }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.ceiling_timer.lock()
            && let Some(timer) = slot.take()
        {
            timer.abort();
        }
        self.inner.release();
    }
}

impl std::fmt::Debug for WakeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeGuard")
            .field("tag", &self.inner.tag)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Acquire/release counters shared by the built-in wake locks
#[derive(Debug, Default)]
pub struct WakeStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl WakeStats {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    pub fn held(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// Wake lock that only counts and logs. Used where the kernel interface is
/// missing or not writable.
#[derive(Debug, Default)]
pub struct NoopWakeLock {
    stats: Arc<WakeStats>,
}

impl NoopWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<WakeStats> {
        Arc::clone(&self.stats)
    }
}

impl WakeLock for NoopWakeLock {
    fn acquire(&self, tag: &str, ceiling: Option<Duration>) -> WakeGuard {
        self.stats.acquired.fetch_add(1, Ordering::AcqRel);
        debug!("Wake assertion '{}' acquired (ceiling: {:?})", tag, ceiling);
        let stats = Arc::clone(&self.stats);
        WakeGuard::new(tag, ceiling, move |tag| {
            stats.released.fetch_add(1, Ordering::AcqRel);
            debug!("Wake assertion '{}' released", tag);
        })
    }
}

/// Linux autosleep wakelocks via `/sys/power/wake_lock`.
///
/// The ceiling is also handed to the kernel as a nanosecond timeout, so the
/// lock expires even if this process dies while holding it.
#[derive(Debug)]
pub struct SysfsWakeLock {
    lock_path: PathBuf,
    unlock_path: PathBuf,
    stats: Arc<WakeStats>,
}

impl SysfsWakeLock {
    pub fn new(power_dir: impl AsRef<Path>) -> Self {
        let power_dir = power_dir.as_ref();
        Self {
            lock_path: power_dir.join("wake_lock"),
            unlock_path: power_dir.join("wake_unlock"),
            stats: Arc::default(),
        }
    }

    /// Returns a lock if `/sys/power/wake_lock` exists and is writable.
    pub fn detect() -> Option<Self> {
        let lock = Self::new("/sys/power");
        OpenOptions::new().append(true).open(&lock.lock_path).ok()?;
        Some(lock)
    }

    pub fn stats(&self) -> Arc<WakeStats> {
        Arc::clone(&self.stats)
    }
}

fn write_sysfs(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(line.as_bytes())
}

impl WakeLock for SysfsWakeLock {
    fn acquire(&self, tag: &str, ceiling: Option<Duration>) -> WakeGuard {
        let line = match ceiling {
            Some(ceiling) => format!("{} {}", tag, ceiling.as_nanos()),
            None => tag.to_string(),
        };
        if let Err(e) = write_sysfs(&self.lock_path, &line) {
            warn!("Failed to take wakelock '{}': {}", tag, e);
        }
        self.stats.acquired.fetch_add(1, Ordering::AcqRel);

        let unlock_path = self.unlock_path.clone();
        let stats = Arc::clone(&self.stats);
        WakeGuard::new(tag, ceiling, move |tag| {
            if let Err(e) = write_sysfs(&unlock_path, tag) {
                // The kernel timeout still expires the lock when a ceiling was set.
                warn!("Failed to release wakelock '{}': {}", tag, e);
            }
            stats.released.fetch_add(1, Ordering::AcqRel);
        })
    }
}

/// The wake lock the daemon should use on this machine.
pub fn platform_wake_lock() -> Arc<dyn WakeLock> {
    match SysfsWakeLock::detect() {
        Some(lock) => {
            info!("Using kernel wakelocks at /sys/power/wake_lock");
            Arc::new(lock)
        }
        None => {
            info!("Kernel wakelocks unavailable, wake assertions are logged only");
            Arc::new(NoopWakeLock::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let lock = NoopWakeLock::new();
        let stats = lock.stats();

        let guard = lock.acquire("tick", Some(Duration::from_secs(5)));
        assert_eq!(stats.held(), 1);
        drop(guard);

        assert_eq!(stats.acquired(), 1);
        assert_eq!(stats.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_forces_single_release() {
        let lock = NoopWakeLock::new();
        let stats = lock.stats();

        let guard = lock.acquire("stuck", Some(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(guard.is_released());
        assert_eq!(stats.released(), 1);

        // Dropping after the ceiling must not release a second time.
        drop(guard);
        assert_eq!(stats.released(), 1);
    }

    #[tokio::test]
    async fn test_guard_released_when_task_panics() {
        let lock = Arc::new(NoopWakeLock::new());
        let stats = lock.stats();

        let task_lock = Arc::clone(&lock);
        let handle = tokio::spawn(async move {
            let _guard = task_lock.acquire("panicky", Some(Duration::from_secs(5)));
            panic!("collector blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(stats.held(), 0);
    }

    #[test]
    fn test_sysfs_lock_writes_kernel_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wake_lock"), "").unwrap();
        std::fs::write(dir.path().join("wake_unlock"), "").unwrap();

        let lock = SysfsWakeLock::new(dir.path());
        let guard = lock.acquire("netmon", Some(Duration::from_millis(1500)));
        drop(guard);

        let locked = std::fs::read_to_string(dir.path().join("wake_lock")).unwrap();
        let unlocked = std::fs::read_to_string(dir.path().join("wake_unlock")).unwrap();
        assert_eq!(locked, "netmon 1500000000");
        assert_eq!(unlocked, "netmon");
        assert_eq!(lock.stats().held(), 0);
    }
}
