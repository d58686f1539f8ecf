//! Sliding-window request quota.

use crate::cancel::CancelHandle;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Admits at most `quota` requests in any trailing `window`.
///
/// This is a sliding log, not a token bucket: every admitted request leaves a
/// timestamp behind, and capacity only comes back as individual timestamps
/// age out of the window. The log lives behind a mutex so concurrent
/// admission checks can never over-admit, whatever the caller does.
#[derive(Debug)]
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    /// Upper bound on a single sleep in [`wait_for_quota`](Self::wait_for_quota).
    poll_interval: Duration,
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A `quota` of zero could never admit anything, so it is raised to one.
    pub fn new(quota: usize, window: Duration, poll_interval: Duration) -> Self {
        if quota == 0 {
            tracing::warn!("Request quota of zero would block forever; admitting one per window");
        }
        let quota = quota.max(1);
        Self {
            quota,
            window,
            poll_interval,
            log: Mutex::new(VecDeque::with_capacity(quota)),
        }
    }

    /// Admit and record a request if the window has room.
    ///
    /// A rejected call leaves nothing behind.
    pub fn check_quota(&self) -> bool {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        self.prune(&mut log, now);
        if log.len() < self.quota {
            log.push_back(now);
            true
        } else {
            false
        }
    }

    /// Block (asynchronously) until a request is admitted.
    ///
    /// Returns `false` as soon as `cancel` is observed; it is checked before
    /// every sleep.
    pub async fn wait_for_quota(&self, cancel: &CancelHandle) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.check_quota() {
                return true;
            }
            let wait = self.until_next_slot().min(self.poll_interval);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Request quota exhausted; waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests admitted within the current window.
    pub fn in_window(&self) -> usize {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut log, Instant::now());
        log.len()
    }

    fn until_next_slot(&self) -> Duration {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        match log.front() {
            // Never zero, or a stalled clock would spin.
            Some(oldest) => (*oldest + self.window)
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1)),
            None => Duration::from_millis(1),
        }
    }

    fn prune(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = log.front()
            && now.saturating_duration_since(*oldest) >= self.window
        {
            log.pop_front();
        }
    }
}
