//! Cross-process mutual exclusion keyed by a shared name.
//!
//! Backed by a POSIX named semaphore with an initial count of one. Any
//! process that opens the same name shares the same semaphore, so it works
//! between processes that have no other relationship.
//!
//! The semaphore is not released if its holder dies while holding it. Hold
//! times are therefore kept to a single read-clear or append operation.

use std::ffi::CString;
use std::io;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};

// NAME_MAX (255) minus the "sem." prefix glibc adds under /dev/shm.
const MAX_LOCK_NAME_LEN: usize = 251;

/// A named, cross-process lock.
pub struct NamedLock {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: a POSIX semaphore handle may be used concurrently from any thread;
// `sem_wait`/`sem_post` are async-signal-safe and thread-safe by definition.
unsafe impl Send for NamedLock {}
// SAFETY: see above. All operations go through the thread-safe sem_* API.
unsafe impl Sync for NamedLock {}

impl NamedLock {
    const MODE: libc::c_uint = 0o600;

    /// Open (creating if needed) the lock called `key`.
    ///
    /// `key` becomes the semaphore name `/<key>`; it must not contain `/`.
    pub fn open(key: &str) -> Result<Self> {
        let name = os_name(key)?;
        let c_name = CString::new(name.clone()).map_err(|_| TransportError::InvalidName {
            name: key.to_string(),
            reason: "name contains a NUL byte",
        })?;

        // SAFETY: `c_name` is a valid NUL-terminated string; the variadic
        // arguments are the mode and initial value that O_CREAT requires,
        // passed as `c_uint` as the C ABI promotes them.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                Self::MODE,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(TransportError::LockOpen {
                name,
                source: io::Error::last_os_error(),
            });
        }

        debug!(lock = %name, "opened named lock");
        Ok(Self { sem, name })
    }

    /// Remove the lock name from the system.
    ///
    /// Processes that already hold the lock open keep using it; later
    /// [`NamedLock::open`] calls create a fresh one. Removing a name that
    /// does not exist is not an error.
    pub fn remove(key: &str) -> Result<()> {
        let name = os_name(key)?;
        let c_name = CString::new(name.clone()).map_err(|_| TransportError::InvalidName {
            name: key.to_string(),
            reason: "name contains a NUL byte",
        })?;

        // SAFETY: `c_name` is a valid NUL-terminated string.
        let rc = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(TransportError::Lock { name, source: err });
            }
        }
        Ok(())
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// Returns [`TransportError::LockTimeout`] when the holder does not
    /// release it in time.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        self.try_acquire(timeout)?
            .ok_or_else(|| TransportError::LockTimeout {
                name: self.name.clone(),
                timeout,
            })
    }

    /// Acquire the lock, waiting at most `timeout`; `Ok(None)` on timeout.
    pub fn try_acquire(&self, timeout: Duration) -> Result<Option<LockGuard<'_>>> {
        let acquired = self.wait(timeout).map_err(|source| TransportError::Lock {
            name: self.name.clone(),
            source,
        })?;

        if acquired {
            trace!(lock = %self.name, "lock acquired");
            Ok(Some(LockGuard { lock: self }))
        } else {
            trace!(lock = %self.name, ?timeout, "lock busy");
            Ok(None)
        }
    }

    /// The OS-level name of this lock (`/<key>`).
    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(target_os = "linux")]
    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            // SAFETY: `self.sem` is a live semaphore from `sem_open`, and
            // `deadline` is a valid timespec.
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    // No sem_timedwait on macOS: poll with sem_trywait instead.
    #[cfg(not(target_os = "linux"))]
    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            // SAFETY: `self.sem` is a live semaphore from `sem_open`.
            let rc = unsafe { libc::sem_trywait(self.sem) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(false);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    fn release(&self) {
        // SAFETY: only called from `LockGuard::drop`, i.e. by the thread
        // that currently holds one unit of the semaphore.
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc != 0 {
            debug!(lock = %self.name, error = %io::Error::last_os_error(), "sem_post failed");
        } else {
            trace!(lock = %self.name, "lock released");
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        // SAFETY: `self.sem` came from a successful `sem_open` and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

impl std::fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLock").field("name", &self.name).finish()
    }
}

/// Holds the named lock until dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a NamedLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

fn os_name(key: &str) -> Result<String> {
    let invalid = |reason| TransportError::InvalidName {
        name: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("name is empty"));
    }
    if key.contains('/') {
        return Err(invalid("name must not contain '/'"));
    }
    if key.len() > MAX_LOCK_NAME_LEN - 1 {
        return Err(invalid("name is longer than 250 bytes"));
    }
    Ok(format!("/{key}"))
}

#[cfg(target_os = "linux")]
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `now` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let secs = timeout.as_secs().min(i32::MAX as u64) as libc::time_t;
    let nanos = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());

    // SAFETY: as above.
    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = now.tv_sec + secs + (nanos / 1_000_000_000) as libc::time_t;
    deadline.tv_nsec = (nanos % 1_000_000_000) as _;
    Ok(deadline)
}
