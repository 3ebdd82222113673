//! Mutation tracking between syncs.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks whether mutations occurred since the last successful sync.
///
/// The data layer only ever calls [`ChangeTracker::mark_changed`]; the
/// coordinator owns the rest of the state and resets it after a successful
/// upload.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    has_changes: AtomicBool,
    change_count: AtomicU64,
    last_sync: RwLock<Option<Instant>>,
}

impl ChangeTracker {
    /// Creates a tracker with no recorded changes and no sync baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a mutation occurred. Idempotent.
    pub fn mark_changed(&self) {
        self.has_changes.store(true, Ordering::SeqCst);
    }

    /// Returns true if any mutation was recorded since the last reset.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.has_changes.load(Ordering::SeqCst)
    }

    /// Returns the number of mutations counted since the last reset.
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::SeqCst)
    }

    /// Returns the time of the last successful sync, if any.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<Instant> {
        *self.last_sync.read()
    }

    /// Decides whether a sync is due, counting this call as one mutation.
    ///
    /// Returns true once the counted mutations reach `batch_size`, or once
    /// `interval` has elapsed since the last successful sync. Before the
    /// first reset there is no time baseline, so only the batch threshold
    /// applies; the periodic timer covers changes that never reach it.
    pub fn should_sync_now(&self, batch_size: u64, interval: Duration) -> bool {
        if !self.has_changes() {
            return false;
        }

        let count = self.change_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= batch_size {
            return true;
        }

        match *self.last_sync.read() {
            Some(last) => last.elapsed() >= interval,
            None => false,
        }
    }

    /// Clears the change flag and count and stamps the sync baseline.
    ///
    /// Called by the coordinator immediately after a successful upload.
    pub fn reset(&self) {
        self.has_changes.store(false, Ordering::SeqCst);
        self.change_count.store(0, Ordering::SeqCst);
        *self.last_sync.write() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    #[test]
    fn mark_changed_is_idempotent() {
        let tracker = ChangeTracker::new();
        assert!(!tracker.has_changes());

        tracker.mark_changed();
        tracker.mark_changed();
        assert!(tracker.has_changes());
        assert_eq!(tracker.change_count(), 0);
    }

    #[test]
    fn no_sync_without_changes() {
        let tracker = ChangeTracker::new();
        assert!(!tracker.should_sync_now(1, INTERVAL));
        assert_eq!(tracker.change_count(), 0);
    }

    #[test]
    fn batch_threshold_triggers() {
        let tracker = ChangeTracker::new();

        tracker.mark_changed();
        assert!(!tracker.should_sync_now(3, INTERVAL));
        tracker.mark_changed();
        assert!(!tracker.should_sync_now(3, INTERVAL));
        tracker.mark_changed();
        assert!(tracker.should_sync_now(3, INTERVAL));
        assert_eq!(tracker.change_count(), 3);
    }

    #[test]
    fn interval_triggers_after_baseline() {
        let tracker = ChangeTracker::new();
        tracker.reset();

        std::thread::sleep(Duration::from_millis(20));
        tracker.mark_changed();
        assert!(tracker.should_sync_now(100, Duration::from_millis(10)));
    }

    #[test]
    fn interval_quiet_before_first_reset() {
        let tracker = ChangeTracker::new();
        tracker.mark_changed();

        assert!(!tracker.should_sync_now(100, Duration::from_millis(1)));
    }

    #[test]
    fn reset_clears_state_and_stamps_baseline() {
        let tracker = ChangeTracker::new();
        tracker.mark_changed();
        tracker.should_sync_now(10, INTERVAL);
        assert_eq!(tracker.change_count(), 1);

        tracker.reset();
        assert!(!tracker.has_changes());
        assert_eq!(tracker.change_count(), 0);
        assert!(tracker.last_sync_time().is_some());
    }
}
