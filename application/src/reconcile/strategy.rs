use std::collections::VecDeque;

use domain::events::ConflictStrategy;

/// Rolling window of conflict outcomes driving strategy selection: heavy
/// contention falls back to fair timestamp ordering, moderate contention
/// to scoped rollback, quiet sessions to the cheap orderings.
pub struct AdaptiveStrategy {
    outcomes: VecDeque<bool>,
    capacity: usize,
    timestamp_threshold: f64,
    selective_threshold: f64,
}

impl AdaptiveStrategy {
    #[must_use]
    pub fn new(capacity: usize, timestamp_threshold: f64, selective_threshold: f64) -> Self {
        Self {
            outcomes: VecDeque::new(),
            capacity: capacity.max(1),
            timestamp_threshold,
            selective_threshold,
        }
    }

    pub fn record(&mut self, conflicted: bool) {
        self.outcomes.push_back(conflicted);
        while self.outcomes.len() > self.capacity {
            self.outcomes.pop_front();
        }
    }

    #[must_use]
    pub fn conflict_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let conflicts = self.outcomes.iter().filter(|&&c| c).count();
        conflicts as f64 / self.outcomes.len() as f64
    }

    #[must_use]
    pub fn pick(&self, locally_drawing: bool) -> ConflictStrategy {
        let rate = self.conflict_rate();
        if rate > self.timestamp_threshold {
            ConflictStrategy::TimestampOrder
        } else if rate > self.selective_threshold {
            ConflictStrategy::SelectiveRollback
        } else if locally_drawing {
            ConflictStrategy::LocalFirst
        } else {
            ConflictStrategy::RemoteFirst
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;

    fn strategy() -> AdaptiveStrategy {
        AdaptiveStrategy::new(20, 0.6, 0.3)
    }

    #[test]
    fn quiet_sessions_prefer_cheap_orderings() {
        let mut s = strategy();
        for _ in 0..10 {
            s.record(false);
        }
        assert_eq!(s.pick(true), ConflictStrategy::LocalFirst);
        assert_eq!(s.pick(false), ConflictStrategy::RemoteFirst);
    }

    #[test]
    fn moderate_contention_selects_selective_rollback() {
        let mut s = strategy();
        for i in 0..20 {
            s.record(i % 2 == 0);
        }
        assert_eq!(s.pick(false), ConflictStrategy::SelectiveRollback);
    }

    #[test]
    fn heavy_contention_switches_to_timestamp_order() {
        let mut s = strategy();
        for _ in 0..20 {
            s.record(true);
        }
        assert_eq!(s.pick(true), ConflictStrategy::TimestampOrder);
    }

    #[test]
    fn window_is_bounded() {
        let mut s = strategy();
        for _ in 0..20 {
            s.record(true);
        }
        for _ in 0..20 {
            s.record(false);
        }
        assert!(s.conflict_rate() < f64::EPSILON);
    }
}
