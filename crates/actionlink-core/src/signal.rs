//! Blocking notifications between a channel's background threads and callers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Single-slot, auto-reset event.
///
/// [`set`](Self::set) stores one pending notification; the next wait consumes
/// it. Setting an already set signal is a no-op.
#[derive(Debug, Default)]
pub struct ResetSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.lock() = true;
        self.cond.notify_one();
    }

    /// Drop any pending notification.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until set, then consume the notification.
    pub fn wait(&self) {
        let mut pending = self.lock();
        while !*pending {
            pending = self
                .cond
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *pending = false;
    }

    /// Block until set or `timeout` elapses. Returns whether a notification
    /// was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock();
        while !*pending {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .cond
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *pending = false;
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Level-triggered boolean that threads can wait on.
#[derive(Debug, Default)]
pub struct StateFlag {
    value: Mutex<bool>,
    cond: Condvar,
}

impl StateFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn get(&self) -> bool {
        *self.lock()
    }

    /// Store `value`, returning the previous one.
    pub fn set(&self, value: bool) -> bool {
        let previous = std::mem::replace(&mut *self.lock(), value);
        self.cond.notify_all();
        previous
    }

    /// Block until the flag equals `wanted` or `timeout` elapses. Returns
    /// whether it does.
    pub fn wait_for(&self, wanted: bool, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |value| *value != wanted)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == wanted
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn reset_signal_is_consumed_by_one_wait() {
        let signal = ResetSignal::new();
        signal.set();
        signal.set();
        assert!(signal.is_set());

        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn reset_signal_wakes_waiter() {
        let signal = Arc::new(ResetSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        signal.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn reset_drops_pending() {
        let signal = ResetSignal::new();
        signal.set();
        signal.reset();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn state_flag_wait_for_current_value_returns_immediately() {
        let flag = StateFlag::new(true);
        let started = Instant::now();
        assert!(flag.wait_for(true, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn state_flag_wait_times_out() {
        let flag = StateFlag::new(false);
        assert!(!flag.wait_for(true, Duration::from_millis(20)));
    }

    #[test]
    fn state_flag_wakes_all_waiters() {
        let flag = Arc::new(StateFlag::new(false));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let flag = Arc::clone(&flag);
                thread::spawn(move || flag.wait_for(true, Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert!(!flag.set(true));
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert!(flag.set(false));
    }
}
