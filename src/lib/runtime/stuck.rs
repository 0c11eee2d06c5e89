use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

pub const STUCK_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const STUCK_THRESHOLD: usize = 5;

/// Counts restart observations per container over a trailing window.
#[derive(Debug, Default)]
pub struct RestartStuckChecker {
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RestartStuckChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stuck(&self, container_id: &str) -> bool {
        self.is_stuck_at(container_id, Instant::now())
    }

    /// Records a restart seen at `now` and reports whether the window now
    /// holds at least `STUCK_THRESHOLD` of them.
    pub fn is_stuck_at(&self, container_id: &str, now: Instant) -> bool {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let restarts = history.entry(container_id.to_string()).or_default();

        while restarts
            .front()
            .is_some_and(|seen| now.saturating_duration_since(*seen) > STUCK_WINDOW)
        {
            restarts.pop_front();
        }
        restarts.push_back(now);

        restarts.len() >= STUCK_THRESHOLD
    }

    pub fn forget(&self, container_id: &str) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(container_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_restart_in_window_is_stuck() {
        let checker = RestartStuckChecker::new();
        let start = Instant::now();

        for i in 0..4 {
            assert!(!checker.is_stuck_at("c1", start + Duration::from_secs(i * 15)));
        }
        assert!(checker.is_stuck_at("c1", start + Duration::from_secs(60)));
    }

    #[test]
    fn old_restarts_are_pruned() {
        let checker = RestartStuckChecker::new();
        let start = Instant::now();

        for i in 0..5 {
            checker.is_stuck_at("c1", start + Duration::from_secs(i * 10));
        }
        assert!(!checker.is_stuck_at("c1", start + Duration::from_secs(6 * 60)));
    }

    #[test]
    fn containers_are_tracked_separately() {
        let checker = RestartStuckChecker::new();
        let start = Instant::now();

        for i in 0..4 {
            checker.is_stuck_at("c1", start + Duration::from_secs(i));
        }
        assert!(!checker.is_stuck_at("c2", start + Duration::from_secs(5)));
        assert!(checker.is_stuck_at("c1", start + Duration::from_secs(5)));

        checker.forget("c1");
        assert!(!checker.is_stuck_at("c1", start + Duration::from_secs(6)));
    }
}
