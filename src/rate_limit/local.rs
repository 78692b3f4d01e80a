//! In-process counter store

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters keyed by `identifier:path`, then by window index
pub struct LocalStore {
    counters: DashMap<String, HashMap<u64, u64>>,
    sweep_interval_secs: u64,
    last_sweep: AtomicU64,
}

impl LocalStore {
    pub fn new(sweep_interval_secs: u64) -> Self {
        Self {
            counters: DashMap::new(),
            sweep_interval_secs,
            last_sweep: AtomicU64::new(0),
        }
    }

    /// Post-increment count for the current window
    pub fn increment(&self, identifier: &str, path: &str, window_index: u64, now_secs: u64) -> u64 {
        self.maybe_sweep(window_index, now_secs);

        let mut windows = self
            .counters
            .entry(format!("{identifier}:{path}"))
            .or_default();
        let count = windows.entry(window_index).or_insert(0);
        *count += 1;
        *count
    }

    /// Run a sweep if the interval has elapsed; only one caller wins the slot
    fn maybe_sweep(&self, current_window: u64, now_secs: u64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_secs.saturating_sub(last) < self.sweep_interval_secs {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now_secs, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.sweep(current_window);
    }

    /// Drop windows older than the previous one and identifiers left empty
    pub fn sweep(&self, current_window: u64) {
        self.counters.retain(|_, windows| {
            windows.retain(|window, _| window + 1 >= current_window);
            !windows.is_empty()
        });
        tracing::debug!(tracked = self.counters.len(), "Rate limit counters swept");
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    #[cfg(test)]
    fn windows_for(&self, identifier: &str, path: &str) -> Vec<u64> {
        let mut windows: Vec<u64> = self
            .counters
            .get(&format!("{identifier}:{path}"))
            .map(|w| w.keys().copied().collect())
            .unwrap_or_default();
        windows.sort_unstable();
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_counts_per_window() {
        let store = LocalStore::new(60);
        assert_eq!(store.increment("ip:a", "/x", 5, 300), 1);
        assert_eq!(store.increment("ip:a", "/x", 5, 301), 2);
        assert_eq!(store.increment("ip:a", "/x", 6, 360), 1);
    }

    #[test]
    fn test_sweep_keeps_current_and_previous_window() {
        let store = LocalStore::new(60);
        store.increment("ip:a", "/x", 3, 0);
        store.increment("ip:a", "/x", 4, 0);
        store.increment("ip:a", "/x", 5, 0);
        store.increment("ip:b", "/x", 1, 0);

        store.sweep(5);

        assert_eq!(store.windows_for("ip:a", "/x"), vec![4, 5]);
        assert!(store.windows_for("ip:b", "/x").is_empty());
        assert_eq!(store.tracked_keys(), 1);
    }

    #[test]
    fn test_opportunistic_sweep_runs_at_most_once_per_interval() {
        let store = LocalStore::new(60);
        store.increment("ip:old", "/x", 0, 0);

        // Interval not yet elapsed
        store.increment("ip:new", "/x", 2, 59);
        assert_eq!(store.tracked_keys(), 2);

        store.increment("ip:new", "/x", 2, 120);
        assert_eq!(store.tracked_keys(), 1);
        assert!(store.windows_for("ip:old", "/x").is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(LocalStore::new(60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        store.increment("ip:shared", "/x", 1, 60);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.increment("ip:shared", "/x", 1, 60), 4001);
    }
}
