// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Per-priority cooldown windows

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::Priority;
use crate::config::CooldownConfig;

/// Earliest next dispatch per priority class
///
/// A class with a dispatch in flight is closed until that dispatch ends.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    durations: HashMap<Priority, Duration>,
    next_allowed: HashMap<Priority, Instant>,
    in_flight: HashSet<Priority>,
}

impl CooldownTracker {
    pub fn new(config: &CooldownConfig) -> Self {
        let durations = HashMap::from([
            (Priority::Critical, Duration::from_secs(config.critical_secs)),
            (Priority::High, Duration::from_secs(config.high_secs)),
            (Priority::Low, Duration::from_secs(config.low_secs)),
        ]);
        Self {
            durations,
            next_allowed: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn duration(&self, priority: Priority) -> Duration {
        self.durations.get(&priority).copied().unwrap_or_default()
    }

    /// True when an alert of this class may go out now
    pub fn is_open(&self, priority: Priority, now: Instant) -> bool {
        !self.in_flight.contains(&priority) && self.next_allowed.get(&priority).map_or(true, |&next| now >= next)
    }

    /// Claim the class for one dispatch; false when closed or already claimed
    pub fn begin(&mut self, priority: Priority, now: Instant) -> bool {
        if !self.is_open(priority, now) {
            return false;
        }
        self.in_flight.insert(priority)
    }

    /// Release a claim from [`begin`](Self::begin) without touching the window
    pub fn end(&mut self, priority: Priority) {
        self.in_flight.remove(&priority);
    }


    /// Time left in the window, zero when open
    pub fn remaining(&self, priority: Priority, now: Instant) -> Duration {
        self.next_allowed
            .get(&priority)
            .map_or(Duration::ZERO, |&next| next.saturating_duration_since(now))
    }

    /// Restart the window after a successful dispatch
    pub fn reset(&mut self, priority: Priority, dispatched: Instant) {
        let until = dispatched + self.duration(priority);
        self.next_allowed.insert(priority, until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_per_class() {
        let mut tracker = CooldownTracker::new(&CooldownConfig::default());
        let t0 = Instant::now();

        assert!(tracker.is_open(Priority::Critical, t0));
        tracker.reset(Priority::Critical, t0);

        assert!(!tracker.is_open(Priority::Critical, t0 + Duration::from_secs(29)));
        assert!(tracker.is_open(Priority::Critical, t0 + Duration::from_secs(30)));
        assert!(tracker.is_open(Priority::Low, t0));
        assert_eq!(
            tracker.remaining(Priority::Critical, t0 + Duration::from_secs(10)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_low_has_longer_window() {
        let mut tracker = CooldownTracker::new(&CooldownConfig::default());
        let t0 = Instant::now();
        tracker.reset(Priority::Low, t0);
        assert!(!tracker.is_open(Priority::Low, t0 + Duration::from_secs(119)));
        assert!(tracker.is_open(Priority::Low, t0 + Duration::from_secs(120)));
    }

    #[test]
    fn test_claim_closes_class_until_released() {
        let mut tracker = CooldownTracker::new(&CooldownConfig::default());
        let t0 = Instant::now();

        assert!(tracker.begin(Priority::Critical, t0));
        assert!(!tracker.begin(Priority::Critical, t0));
        assert!(!tracker.is_open(Priority::Critical, t0 + Duration::from_secs(600)));
        assert!(tracker.begin(Priority::High, t0));

        // Failed dispatch: released without opening a window
        tracker.end(Priority::Critical);
        assert!(tracker.is_open(Priority::Critical, t0));

        assert!(tracker.begin(Priority::Critical, t0));
        tracker.reset(Priority::Critical, t0);
        tracker.end(Priority::Critical);
        assert!(!tracker.is_open(Priority::Critical, t0 + Duration::from_secs(29)));
    }
}
