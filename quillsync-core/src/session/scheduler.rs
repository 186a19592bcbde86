//! Debounced autosave scheduling.
//!
//! The scheduler owns a single deadline. Arming replaces any earlier
//! deadline, so a burst of edits inside one quiet period collapses into one
//! save. A fire requested while a save is already in flight is deferred and
//! the timer re-armed once that save resolves — saves never queue up.

use std::time::Duration;

use tokio::time::Instant;

/// Lower bound on the debounce interval to bound write amplification.
pub const MIN_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5);
/// Interval used when the caller doesn't configure one.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct AutoSaveScheduler {
    interval: Duration,
    enabled: bool,
    deadline: Option<Instant>,
    deferred: bool,
}

impl AutoSaveScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_AUTOSAVE_INTERVAL),
            enabled: true,
            deadline: None,
            deferred: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Clamped to [`MIN_AUTOSAVE_INTERVAL`]. Takes effect on the next arm.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(MIN_AUTOSAVE_INTERVAL);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling suppresses firing but does not clear dirty state upstream;
    /// a manual save remains required.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    /// (Re)starts the debounce timer. A no-op while disabled.
    pub fn arm(&mut self) {
        if self.enabled {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    /// Starts the timer with an explicit delay, used for retry backoff.
    pub fn arm_after(&mut self, delay: Duration) {
        if self.enabled {
            self.deadline = Some(Instant::now() + delay);
        }
    }

    /// Clears the pending deadline and any deferred fire.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.deferred = false;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Acknowledges that the deadline elapsed; each arm fires at most once.
    pub fn fired(&mut self) {
        self.deadline = None;
    }

    /// Remembers a fire that happened while a save was in flight.
    pub fn defer(&mut self) {
        self.deferred = true;
    }

    /// Consumes the deferred marker.
    pub fn take_deferred(&mut self) -> bool {
        std::mem::take(&mut self.deferred)
    }
}

impl Default for AutoSaveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_is_clamped() {
        let scheduler = AutoSaveScheduler::new(Duration::from_millis(100));
        assert_eq!(scheduler.interval(), MIN_AUTOSAVE_INTERVAL);

        let mut scheduler = AutoSaveScheduler::new(Duration::from_secs(30));
        assert_eq!(scheduler.interval(), Duration::from_secs(30));
        scheduler.set_interval(Duration::from_secs(1));
        assert_eq!(scheduler.interval(), MIN_AUTOSAVE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut scheduler = AutoSaveScheduler::default();
        scheduler.arm();
        let first = scheduler.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        scheduler.arm();
        let second = scheduler.deadline().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_cancel_clears_deadline_and_deferred() {
        let mut scheduler = AutoSaveScheduler::default();
        scheduler.arm();
        scheduler.defer();
        scheduler.cancel();
        assert!(scheduler.deadline().is_none());
        assert!(!scheduler.take_deferred());
    }

    #[test]
    fn test_disabled_scheduler_never_arms() {
        let mut scheduler = AutoSaveScheduler::default();
        scheduler.set_enabled(false);
        scheduler.arm();
        assert!(scheduler.deadline().is_none());

        scheduler.set_enabled(true);
        scheduler.arm();
        assert!(scheduler.deadline().is_some());
    }

    #[test]
    fn test_disabling_cancels_pending_deadline() {
        let mut scheduler = AutoSaveScheduler::default();
        scheduler.arm();
        scheduler.set_enabled(false);
        assert!(scheduler.deadline().is_none());
    }

    #[test]
    fn test_deferred_fire_is_consumed_once() {
        let mut scheduler = AutoSaveScheduler::default();
        scheduler.defer();
        assert!(scheduler.take_deferred());
        assert!(!scheduler.take_deferred());
    }
}
