//! Bounded-wait access to lock-guarded fields
//!
//! The audio block and the secondary keyboard bitmap may only be touched
//! while holding the host's companion lock. Every wait is bounded; if the
//! lock is not cleanly acquired the mutation is skipped, never partially
//! applied.
//!
//! | Outcome     | `mutate`              | `read_or_default` | `courtesy`              |
//! |-------------|-----------------------|-------------------|-------------------------|
//! | Acquired    | run, release          | run, release      | run, release            |
//! | Abandoned   | release, skip, error  | release, default  | release, run            |
//! | TimedOut    | skip, error           | default           | run unlocked            |
//! | Failed      | skip, error           | default           | run unlocked            |

use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::backend::{InterprocessLock, LockWait};
use crate::{LinkError, Result};

/// A lock together with the bound applied to each wait on it.
pub struct LockGuarded<'a, L: InterprocessLock> {
    lock: &'a L,
    timeout: Duration,
}

impl<'a, L: InterprocessLock> LockGuarded<'a, L> {
    pub fn new(lock: &'a L, timeout: Duration) -> Self {
        Self { lock, timeout }
    }

    /// Run `f` while holding the lock, or report why it was skipped.
    pub fn mutate<T>(&self, what: &str, f: impl FnOnce() -> T) -> Result<T> {
        match self.lock.acquire(self.timeout) {
            LockWait::Acquired => {
                trace!(what, "Link lock acquired");
                let value = f();
                self.lock.release();
                Ok(value)
            }
            LockWait::Abandoned => {
                self.lock.release();
                warn!(what, "Link lock was abandoned; skipping write");
                Err(LinkError::LockAbandoned)
            }
            LockWait::TimedOut => {
                warn!(what, timeout = ?self.timeout, "Timed out waiting for link lock; skipping write");
                Err(LinkError::LockTimedOut { timeout: self.timeout })
            }
            LockWait::Failed => {
                warn!(what, "Waiting for link lock failed; skipping write");
                Err(LinkError::LockFailed { reason: format!("wait failed during {what}") })
            }
        }
    }

    /// Run `f` under the lock, falling back to `T::default()` on any other outcome.
    pub fn read_or_default<T: Default>(&self, what: &str, f: impl FnOnce() -> T) -> T {
        self.mutate(what, f).unwrap_or_else(|e| {
            debug!(what, error = %e, "Guarded read returned default");
            T::default()
        })
    }

    /// Try the lock as a courtesy, then run `f` whatever the outcome.
    ///
    /// For readers that accept a torn view over stale data.
    pub fn courtesy<T>(&self, what: &str, f: impl FnOnce() -> T) -> T {
        let outcome = self.lock.acquire(self.timeout);
        let value = f();
        match outcome {
            LockWait::Acquired => self.lock.release(),
            LockWait::Abandoned => {
                debug!(what, "Link lock was abandoned; read may be inconsistent");
                self.lock.release();
            }
            LockWait::TimedOut => {
                debug!(what, timeout = ?self.timeout, "Link lock timed out; read without it");
            }
            LockWait::Failed => {
                debug!(what, "Waiting for link lock failed; read without it");
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Lock that replays scripted outcomes and counts releases.
    struct ScriptedLock {
        outcomes: Mutex<Vec<LockWait>>,
        releases: AtomicU32,
    }

    impl ScriptedLock {
        fn new(outcomes: &[LockWait]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().rev().copied().collect()),
                releases: AtomicU32::new(0),
            }
        }

        fn releases(&self) -> u32 {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl InterprocessLock for ScriptedLock {
        fn acquire(&self, _timeout: Duration) -> LockWait {
            self.outcomes.lock().expect("outcomes").pop().unwrap_or(LockWait::Failed)
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    const BOUND: Duration = Duration::from_millis(3000);

    #[test]
    fn acquired_runs_and_releases() {
        let lock = ScriptedLock::new(&[LockWait::Acquired]);
        let guarded = LockGuarded::new(&lock, BOUND);
        assert_eq!(guarded.mutate("test", || 7).expect("acquired"), 7);
        assert_eq!(lock.releases(), 1);
    }

    #[test]
    fn abandoned_releases_and_skips() {
        let lock = ScriptedLock::new(&[LockWait::Abandoned]);
        let guarded = LockGuarded::new(&lock, BOUND);
        let ran = Cell::new(false);
        let result = guarded.mutate("test", || ran.set(true));
        assert!(matches!(result, Err(LinkError::LockAbandoned)));
        assert!(!ran.get());
        assert_eq!(lock.releases(), 1);
    }

    #[test]
    fn timeout_and_failure_skip_without_release() {
        for outcome in [LockWait::TimedOut, LockWait::Failed] {
            let lock = ScriptedLock::new(&[outcome]);
            let guarded = LockGuarded::new(&lock, BOUND);
            let ran = Cell::new(false);
            assert!(guarded.mutate("test", || ran.set(true)).is_err());
            assert!(!ran.get());
            assert_eq!(lock.releases(), 0);
        }
    }

    #[test]
    fn timeout_error_carries_bound() {
        let lock = ScriptedLock::new(&[LockWait::TimedOut]);
        let err = LockGuarded::new(&lock, BOUND).mutate("test", || ()).unwrap_err();
        assert!(matches!(err, LinkError::LockTimedOut { timeout } if timeout == BOUND));
    }

    #[test]
    fn reads_default_on_any_failure() {
        for outcome in [LockWait::Abandoned, LockWait::TimedOut, LockWait::Failed] {
            let lock = ScriptedLock::new(&[outcome]);
            assert_eq!(LockGuarded::new(&lock, BOUND).read_or_default("test", || 42u8), 0);
        }
    }

    #[test]
    fn courtesy_reads_whatever_the_outcome() {
        for (outcome, releases) in [
            (LockWait::Acquired, 1),
            (LockWait::Abandoned, 1),
            (LockWait::TimedOut, 0),
            (LockWait::Failed, 0),
        ] {
            let lock = ScriptedLock::new(&[outcome]);
            assert_eq!(LockGuarded::new(&lock, BOUND).courtesy("frame", || 9), 9);
            assert_eq!(lock.releases(), releases, "{outcome:?}");
        }
    }
}
