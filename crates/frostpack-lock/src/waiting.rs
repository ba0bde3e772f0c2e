//! Lease-aware waiting while a lock is held.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::service::LockService;

/// Lower bound on one sleep slice, so a degenerate ttl/margin pairing still
/// advances through the wait instead of spinning on renewals.
const MIN_SLICE: Duration = Duration::from_millis(1);

/// Companion to a held lock that sleeps without letting the lease lapse.
///
/// Restore polling can hold its lock for minutes while waiting on cold
/// storage. Each wait is sliced so that whenever the remaining lease drops
/// below the renewal margin the lock is renewed before sleeping further.
pub struct WaitingLock<'a> {
    name: String,
    service: &'a dyn LockService,
    renew_margin: Duration,
    leased_at: Instant,
}

impl<'a> WaitingLock<'a> {
    /// Track a lock that was just acquired from `service`.
    ///
    /// The margin is clamped below the service's time-to-live; a margin at
    /// or past the ttl would demand a renewal before every sleep.
    pub fn new(name: impl Into<String>, service: &'a dyn LockService, renew_margin: Duration) -> Self {
        let ttl = service.time_to_live();
        let renew_margin = if renew_margin < ttl {
            renew_margin
        } else {
            warn!(?renew_margin, ?ttl, "renewal margin not below lock ttl, clamping to half");
            ttl / 2
        };
        WaitingLock {
            name: name.into(),
            service,
            renew_margin,
            leased_at: Instant::now(),
        }
    }

    /// Sleep for `delay`, renewing the lease whenever it would otherwise
    /// expire mid-sleep.
    pub fn wait_and_renew(&mut self, delay: Duration) {
        let mut remaining = delay;
        while !remaining.is_zero() {
            if self.lease_left().is_zero() {
                debug!(lock = %self.name, "renewing lease before continuing wait");
                self.service.renew(&self.name);
                self.leased_at = Instant::now();
            }
            let slice = remaining.min(self.lease_left().max(MIN_SLICE));
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    fn lease_left(&self) -> Duration {
        self.service
            .time_to_live()
            .saturating_sub(self.leased_at.elapsed())
            .saturating_sub(self.renew_margin)
    }
}
