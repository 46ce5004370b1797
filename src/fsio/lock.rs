//! Advisory cross-process file locks with stale-owner reaping.
//!
//! A lock is a sidecar file (`<path>` itself is the sidecar for the project
//! lock at `.wm/.lock`) holding a JSON [`LockRecord`], plus an OS advisory
//! lock (`flock`/`LockFileEx` via the `fs2` `FileExt`) held on that sidecar.
//! The OS lock is authoritative; the record exists so other processes can
//! tell *who* holds the lock and whether the holder is still alive.
//!
//! Stale locks: if the sidecar cannot be locked but its record has expired,
//! or names a process that no longer exists on this host, the sidecar is
//! deleted and acquisition retries. A process that exits without releasing
//! drops the OS lock automatically; its leftover sidecar is reaped here on
//! the next acquire.
//!
//! Within one process, acquisition through a single [`LockManager`] is
//! re-entrant: a second acquire of a path the manager already holds
//! increments a count instead of touching the OS (which would self-deadlock
//! under flock semantics). Across processes the lock is strict.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LockKind / LockRecord / LockOptions
// ---------------------------------------------------------------------------

/// Exclusive or shared acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Excludes all other lockers.
    Exclusive,
    /// Coexists with other shared holders; excludes exclusive.
    Shared,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// The owner information persisted in a lock sidecar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owning process id.
    pub pid: u32,
    /// Host the owning process runs on.
    pub hostname: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock becomes stale regardless of owner liveness.
    pub expires_at: DateTime<Utc>,
    /// Exclusive or shared.
    pub kind: LockKind,
}

impl LockRecord {
    /// True if this record no longer protects its sidecar: the expiry has
    /// passed, or the owner is a dead process on this host.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, our_hostname: &str) -> bool {
        if self.expires_at < now {
            return true;
        }
        self.hostname == our_hostname && !pid_alive(self.pid)
    }
}

/// Acquisition parameters.
#[derive(Clone, Copy, Debug)]
pub struct LockOptions {
    /// Exclusive (default) or shared.
    pub kind: LockKind,
    /// Give up after this long in blocking mode.
    pub timeout: Duration,
    /// Return [`LockError::Blocked`] immediately instead of waiting.
    pub non_blocking: bool,
    /// Age past which a held lock's record is considered stale.
    pub stale_timeout: Duration,
    /// Initial retry delay; doubles per retry, capped at one second.
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            kind: LockKind::Exclusive,
            timeout: Duration::from_secs(30),
            non_blocking: false,
            stale_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl LockOptions {
    /// Default options with a shared kind.
    #[must_use]
    pub fn shared() -> Self {
        Self {
            kind: LockKind::Shared,
            ..Self::default()
        }
    }
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Read-only counters maintained by a [`LockManager`].
#[derive(Debug, Default)]
pub struct LockMetrics {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    timeout: AtomicU64,
    stale_reaped: AtomicU64,
    active: AtomicU64,
}

/// A point-in-time copy of the lock counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LockMetricsSnapshot {
    /// Acquisition attempts, including re-entrant ones.
    pub total_requests: u64,
    /// Successful acquisitions.
    pub successful: u64,
    /// Failures other than timeout (I/O, blocked in non-blocking mode).
    pub failed: u64,
    /// Acquisitions that timed out.
    pub timeout: u64,
    /// Stale sidecars deleted.
    pub stale_reaped: u64,
    /// Currently held guards.
    pub active: u64,
}

impl LockMetrics {
    fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            stale_reaped: self.stale_reaped.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from lock acquisition.
#[derive(Debug)]
pub enum LockError {
    /// Non-blocking acquisition found the lock held by a live owner.
    Blocked {
        /// The sidecar path.
        path: PathBuf,
        /// The current holder, when its record was readable.
        holder: Option<LockRecord>,
    },
    /// Blocking acquisition exhausted its timeout.
    Timeout {
        /// The sidecar path.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
        /// The current holder, when its record was readable.
        holder: Option<LockRecord>,
    },
    /// An I/O failure on the sidecar.
    Io {
        /// The sidecar path.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// A shared guard is already held by this manager and an exclusive one
    /// was requested — upgrading in place would self-deadlock.
    WouldDeadlock {
        /// The sidecar path.
        path: PathBuf,
    },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { path, holder } => {
                write!(f, "lock at '{}' is held", path.display())?;
                if let Some(rec) = holder {
                    write!(f, " by pid {} on {}", rec.pid, rec.hostname)?;
                }
                Ok(())
            }
            Self::Timeout {
                path,
                waited,
                holder,
            } => {
                write!(
                    f,
                    "timed out after {:.1}s waiting for lock at '{}'",
                    waited.as_secs_f64(),
                    path.display()
                )?;
                if let Some(rec) = holder {
                    write!(f, " (held by pid {} on {})", rec.pid, rec.hostname)?;
                }
                write!(
                    f,
                    "\n  To fix: wait for the other operation to finish, or remove the sidecar if you are certain no other process is running."
                )
            }
            Self::Io { path, source } => {
                write!(f, "lock I/O error at '{}': {source}", path.display())
            }
            Self::WouldDeadlock { path } => {
                write!(
                    f,
                    "cannot upgrade a shared lock to exclusive at '{}' within one process",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// LockManager / LockGuard
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct HeldLock {
    file: fs::File,
    sidecar: PathBuf,
    kind: LockKind,
    count: usize,
}

/// Handle through which all locks of one invocation are acquired.
///
/// Owns the metrics counters and the in-process re-entrancy table. There is
/// deliberately no global instance; operations create one and pass it down.
#[derive(Clone, Default, Debug)]
pub struct LockManager {
    metrics: Arc<LockMetrics>,
    held: Arc<Mutex<HashMap<PathBuf, HeldLock>>>,
}

impl LockManager {
    /// Create a manager with fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of the counters.
    #[must_use]
    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Acquire the lock whose sidecar lives at `sidecar`.
    ///
    /// # Errors
    /// [`LockError::Blocked`] in non-blocking mode, [`LockError::Timeout`]
    /// when the wait budget runs out, [`LockError::Io`] on sidecar I/O
    /// failure, [`LockError::WouldDeadlock`] on an in-process shared →
    /// exclusive upgrade.
    pub fn acquire(&self, sidecar: &Path, opts: LockOptions) -> Result<LockGuard, LockError> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        // Re-entrant path: this manager already holds the sidecar.
        {
            let mut held = self.held.lock().expect("lock table poisoned");
            if let Some(entry) = held.get_mut(&sidecar.to_path_buf()) {
                if entry.kind == LockKind::Shared && opts.kind == LockKind::Exclusive {
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(LockError::WouldDeadlock {
                        path: sidecar.to_path_buf(),
                    });
                }
                entry.count += 1;
                self.metrics.successful.fetch_add(1, Ordering::Relaxed);
                self.metrics.active.fetch_add(1, Ordering::Relaxed);
                return Ok(LockGuard {
                    manager: self.clone(),
                    sidecar: sidecar.to_path_buf(),
                    released: false,
                });
            }
        }

        let file = self.acquire_os_lock(sidecar, opts)?;
        self.write_record(&file, sidecar, opts)?;

        let mut held = self.held.lock().expect("lock table poisoned");
        held.insert(
            sidecar.to_path_buf(),
            HeldLock {
                file,
                sidecar: sidecar.to_path_buf(),
                kind: opts.kind,
                count: 1,
            },
        );
        self.metrics.successful.fetch_add(1, Ordering::Relaxed);
        self.metrics.active.fetch_add(1, Ordering::Relaxed);
        Ok(LockGuard {
            manager: self.clone(),
            sidecar: sidecar.to_path_buf(),
            released: false,
        })
    }

    /// Retry loop: try the OS lock, reap stale sidecars, back off.
    fn acquire_os_lock(&self, sidecar: &Path, opts: LockOptions) -> Result<fs::File, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: sidecar.to_path_buf(),
            source,
        };
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let started = Instant::now();
        let mut delay = opts.retry_delay;
        loop {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(sidecar)
                .map_err(io_err)?;

            let attempt = match opts.kind {
                LockKind::Exclusive => file.try_lock_exclusive(),
                LockKind::Shared => fs2::FileExt::try_lock_shared(&file),
            };
            match attempt {
                Ok(()) => return Ok(file),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    drop(file);
                    let holder = read_record(sidecar);
                    // Only a readable-but-stale record is reaped. A locked
                    // sidecar with no record yet belongs to a holder that is
                    // between locking and writing its record; deleting it
                    // here would hand out two locks on different inodes.
                    let stale = holder
                        .as_ref()
                        .is_some_and(|rec| rec.is_stale(Utc::now(), &local_hostname()));
                    if stale && fs::remove_file(sidecar).is_ok() {
                        self.metrics.stale_reaped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(sidecar = %sidecar.display(), "reaped stale lock");
                        continue;
                    }
                    if opts.non_blocking {
                        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(LockError::Blocked {
                            path: sidecar.to_path_buf(),
                            holder,
                        });
                    }
                    if started.elapsed() >= opts.timeout {
                        self.metrics.timeout.fetch_add(1, Ordering::Relaxed);
                        return Err(LockError::Timeout {
                            path: sidecar.to_path_buf(),
                            waited: started.elapsed(),
                            holder,
                        });
                    }
                    std::thread::sleep(delay.min(opts.timeout.saturating_sub(started.elapsed())));
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(source) => {
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(io_err(source));
                }
            }
        }
    }

    /// Persist our owner record into the (now locked) sidecar.
    ///
    /// The sidecar *is* the lock, so this writes in place rather than via
    /// rename — a rename would swap the inode out from under the OS lock.
    fn write_record(
        &self,
        mut file: &fs::File,
        sidecar: &Path,
        opts: LockOptions,
    ) -> Result<(), LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: sidecar.to_path_buf(),
            source,
        };
        let now = Utc::now();
        let record = LockRecord {
            pid: std::process::id(),
            hostname: local_hostname(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(opts.stale_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            kind: opts.kind,
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| io_err(io::Error::other(e)))?;
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }

    /// Decrement the hold count for `sidecar`; fully release at zero.
    fn release(&self, sidecar: &Path) {
        let mut held = self.held.lock().expect("lock table poisoned");
        let Some(entry) = held.get_mut(sidecar) else {
            return;
        };
        entry.count -= 1;
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
        if entry.count == 0 {
            let entry = held.remove(sidecar).expect("entry just observed");
            let _ = fs::remove_file(&entry.sidecar);
            let _ = FileExt::unlock(&entry.file);
        }
    }
}

/// A held lock. Releases on drop; [`LockGuard::release`] releases eagerly.
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    sidecar: PathBuf,
    released: bool,
}

impl LockGuard {
    /// The sidecar path this guard protects.
    #[must_use]
    pub fn sidecar(&self) -> &Path {
        &self.sidecar
    }

    /// Release explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.sidecar);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_record(sidecar: &Path) -> Option<LockRecord> {
    let bytes = fs::read(sidecar).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn local_hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_owned())
}

/// True if a process with `pid` exists on this host.
fn pid_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};
    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    sys.process(target).is_some()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
