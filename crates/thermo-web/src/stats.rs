//! Request counters.
//!
//! One monotonically increasing counter per `(path, method, status)` triple,
//! keyed by the status that was actually returned. Entries are created
//! lazily on first occurrence and never evicted; the route set is small and
//! fixed. All mutation happens behind a mutex so the counters survive a
//! multi-threaded server without sharding.

use crate::request::Method;
use std::collections::HashMap;
use std::sync::Mutex;

/// The counter key: request path, method and the resulting status.
pub type StatKey = (String, Method, u16);

/// Per-(path, method, status) request counters.
#[derive(Debug, Default)]
pub struct RequestStats {
    counts: Mutex<HashMap<StatKey, u64>>,
}

impl RequestStats {
    /// Create an empty counter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request.
    pub fn increment(&self, path: &str, method: Method, status: u16) {
        let mut counts = self.counts.lock().unwrap();
        *counts
            .entry((path.to_string(), method, status))
            .or_insert(0) += 1;
    }

    /// The current count for one triple (0 if never seen).
    pub fn count(&self, path: &str, method: Method, status: u16) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .get(&(path.to_string(), method, status))
            .copied()
            .unwrap_or(0)
    }

    /// All counters in deterministic (sorted) order.
    pub fn snapshot(&self) -> Vec<(StatKey, u64)> {
        let counts = self.counts.lock().unwrap();
        let mut entries: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment_by_one() {
        let stats = RequestStats::new();
        assert_eq!(stats.count("/missing", Method::Get, 404), 0);
        stats.increment("/missing", Method::Get, 404);
        stats.increment("/missing", Method::Get, 404);
        assert_eq!(stats.count("/missing", Method::Get, 404), 2);
    }

    #[test]
    fn test_counters_are_keyed_by_status() {
        let stats = RequestStats::new();
        stats.increment("/x", Method::Get, 200);
        stats.increment("/x", Method::Get, 304);
        assert_eq!(stats.count("/x", Method::Get, 200), 1);
        assert_eq!(stats.count("/x", Method::Get, 304), 1);
        assert_eq!(stats.count("/x", Method::Head, 200), 0);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let stats = RequestStats::new();
        stats.increment("/b", Method::Get, 200);
        stats.increment("/a", Method::Head, 200);
        stats.increment("/a", Method::Get, 404);

        let snapshot = stats.snapshot();
        let keys: Vec<_> = snapshot
            .iter()
            .map(|((path, method, status), _)| (path.as_str(), *method, *status))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("/a", Method::Get, 404),
                ("/a", Method::Head, 200),
                ("/b", Method::Get, 200),
            ]
        );
    }
}
