//! Lock service trait and the in-process implementation.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Mutual exclusion on named resources.
///
/// Object safe so that tasks can hold a `&dyn LockService`; the typed
/// closure API lives on [`LockServiceExt`].
pub trait LockService: Send + Sync {
    /// Run `body` while holding `name`, blocking until the lock is free.
    fn run_with_lock(&self, name: &str, body: &mut dyn FnMut());

    /// Try to acquire `name` within `timeout`. Runs `body` and returns true
    /// on success, returns false without running `body` on timeout.
    fn try_run_with_lock(&self, name: &str, timeout: Duration, body: &mut dyn FnMut()) -> bool;

    /// Extend the lease on a held lock.
    fn renew(&self, name: &str);

    /// Lease duration granted on acquisition and on each renewal.
    fn time_to_live(&self) -> Duration;
}

/// Typed convenience layer over [`LockService`].
pub trait LockServiceExt: LockService {
    fn with_lock<T>(&self, name: &str, body: impl FnOnce() -> T) -> T {
        let mut body = Some(body);
        let mut result = None;
        self.run_with_lock(name, &mut || {
            if let Some(body) = body.take() {
                result = Some(body());
            }
        });
        match result {
            Some(value) => value,
            None => unreachable!("lock body not invoked"),
        }
    }

    fn try_with_lock<T>(
        &self,
        name: &str,
        timeout: Duration,
        body: impl FnOnce() -> T,
    ) -> Option<T> {
        let mut body = Some(body);
        let mut result = None;
        self.try_run_with_lock(name, timeout, &mut || {
            if let Some(body) = body.take() {
                result = Some(body());
            }
        });
        result
    }
}

impl<S: LockService + ?Sized> LockServiceExt for S {}

struct LockState {
    held: bool,
    lease_deadline: Option<Instant>,
    renewals: u64,
}

struct LockEntry {
    state: Mutex<LockState>,
    freed: Condvar,
}

/// In-process lock service backed by a named mutex registry.
///
/// Leases are advisory within one process: expiry is tracked so tests and
/// long-running holders can observe renewal behaviour, but a lapsed lease is
/// not forcibly revoked.
pub struct LocalLockService {
    ttl: Duration,
    entries: Mutex<HashMap<String, Arc<LockEntry>>>,
}

impl LocalLockService {
    pub fn new(ttl: Duration) -> Self {
        LocalLockService {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, name: &str) -> Arc<LockEntry> {
        let mut entries = lock_unpoisoned(&self.entries);
        Arc::clone(entries.entry(name.to_string()).or_insert_with(|| {
            Arc::new(LockEntry {
                state: Mutex::new(LockState {
                    held: false,
                    lease_deadline: None,
                    renewals: 0,
                }),
                freed: Condvar::new(),
            })
        }))
    }

    fn release(&self, entry: &LockEntry) {
        let mut state = lock_unpoisoned(&entry.state);
        state.held = false;
        state.lease_deadline = None;
        entry.freed.notify_one();
    }

    /// Renewal count for a lock, for observing lease behaviour in tests.
    pub fn renewal_count(&self, name: &str) -> u64 {
        lock_unpoisoned(&self.entry(name).state).renewals
    }
}

impl LockService for LocalLockService {
    fn run_with_lock(&self, name: &str, body: &mut dyn FnMut()) {
        let entry = self.entry(name);
        {
            let mut state = lock_unpoisoned(&entry.state);
            while state.held {
                state = unwrap_poison(entry.freed.wait(state));
            }
            state.held = true;
            state.lease_deadline = Some(Instant::now() + self.ttl);
        }
        trace!(lock = name, "acquired");
        body();
        self.release(&entry);
        trace!(lock = name, "released");
    }

    fn try_run_with_lock(&self, name: &str, timeout: Duration, body: &mut dyn FnMut()) -> bool {
        let entry = self.entry(name);
        let deadline = Instant::now() + timeout;
        {
            let mut state = lock_unpoisoned(&entry.state);
            while state.held {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(lock = name, ?timeout, "acquisition timed out");
                    return false;
                }
                let (next, wait) = unwrap_poison_timeout(entry.freed.wait_timeout(state, remaining));
                state = next;
                if wait.timed_out() && state.held {
                    debug!(lock = name, ?timeout, "acquisition timed out");
                    return false;
                }
            }
            state.held = true;
            state.lease_deadline = Some(Instant::now() + self.ttl);
        }
        body();
        self.release(&entry);
        true
    }

    fn renew(&self, name: &str) {
        let entry = self.entry(name);
        let mut state = lock_unpoisoned(&entry.state);
        if state.held {
            state.lease_deadline = Some(Instant::now() + self.ttl);
            state.renewals += 1;
            trace!(lock = name, renewals = state.renewals, "lease renewed");
        }
    }

    fn time_to_live(&self) -> Duration {
        self.ttl
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unwrap_poison<'a, T>(
    result: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unwrap_poison_timeout<'a, T>(
    result: Result<
        (MutexGuard<'a, T>, std::sync::WaitTimeoutResult),
        std::sync::PoisonError<(MutexGuard<'a, T>, std::sync::WaitTimeoutResult)>,
    >,
) -> (MutexGuard<'a, T>, std::sync::WaitTimeoutResult) {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}
