//! Outcome counters for quorum queries and submissions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed set of named counters shared between tasks.
///
/// Names are registered up front; bumping an unregistered name is a no-op so
/// a typo never panics inside a request path.
#[derive(Debug)]
pub struct StatsCounter {
    counters: BTreeMap<&'static str, AtomicU64>,
}

impl StatsCounter {
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            counters: names.iter().map(|&n| (n, AtomicU64::new(0))).collect(),
        }
    }

    pub fn increment(&self, name: &str) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Current values, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Zero every counter and return the values they held.
    pub fn take(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.swap(0, Ordering::Relaxed)))
            .collect()
    }
}

/// `name=value` pairs separated by spaces, for log lines.
impl fmt::Display for StatsCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.snapshot().into_iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_ignored() {
        let stats = StatsCounter::new(&["quorum_reached", "quorum_failed"]);
        stats.increment("quorum_reached");
        stats.increment("missing");
        assert_eq!(stats.get("quorum_reached"), 1);
        assert_eq!(stats.get("missing"), 0);
        assert_eq!(stats.snapshot().len(), 2);
    }

    #[test]
    fn display_is_sorted_and_take_resets() {
        let stats = StatsCounter::new(&["quorum_reached", "broadcasts"]);
        stats.increment("broadcasts");
        stats.increment("quorum_reached");
        stats.increment("quorum_reached");
        assert_eq!(stats.to_string(), "broadcasts=1 quorum_reached=2");

        let taken = stats.take();
        assert_eq!(taken["quorum_reached"], 2);
        assert_eq!(stats.get("quorum_reached"), 0);
    }
}
