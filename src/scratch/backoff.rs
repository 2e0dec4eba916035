use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::lock_or_recover;

/// Picks the sleep interval for a polling loop: short while input keeps
/// arriving, long once the loop has been idle past `idle_threshold`.
#[derive(Debug)]
pub struct BackoffScheduler {
    active_delay: Duration,
    idle_delay: Duration,
    idle_threshold: Duration,
    last_trigger: Mutex<Option<Instant>>,
}

impl BackoffScheduler {
    pub fn new(active_delay: Duration, idle_delay: Duration, idle_threshold: Duration) -> Self {
        Self {
            active_delay,
            idle_delay,
            idle_threshold,
            last_trigger: Mutex::new(None),
        }
    }

    pub fn active_delay(&self) -> Duration {
        self.active_delay
    }

    pub fn idle_delay(&self) -> Duration {
        self.idle_delay
    }

    pub fn notify_triggered(&self) {
        self.notify_triggered_at(Instant::now());
    }

    pub fn notify_triggered_at(&self, at: Instant) {
        *lock_or_recover(&self.last_trigger, "backoff trigger") = Some(at);
    }

    pub fn sleep_interval(&self) -> Duration {
        self.sleep_interval_at(Instant::now())
    }

    /// A scheduler that was never triggered stays on the active delay.
    pub fn sleep_interval_at(&self, now: Instant) -> Duration {
        let last = *lock_or_recover(&self.last_trigger, "backoff trigger");
        match last {
            Some(last) if now.saturating_duration_since(last) > self.idle_threshold => {
                self.idle_delay
            }
            _ => self.active_delay,
        }
    }

    pub fn reset(&self) {
        *lock_or_recover(&self.last_trigger, "backoff trigger") = None;
    }
}
