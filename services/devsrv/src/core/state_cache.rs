//! Soft latch of the last commanded locker state
//!
//! Last write wins. Unknown lockers read as locked.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Status row returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockerState {
    pub locker_number: i32,
    pub is_unlocked: bool,
}

#[derive(Debug, Default)]
pub struct LockerStateCache {
    states: DashMap<i32, bool>,
}

impl LockerStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unlocked(&self, locker: i32) {
        self.states.insert(locker, true);
    }

    pub fn mark_locked(&self, locker: i32) {
        self.states.insert(locker, false);
    }

    pub fn is_unlocked(&self, locker: i32) -> bool {
        self.states.get(&locker).is_some_and(|s| *s)
    }

    pub fn state(&self, locker: i32) -> LockerState {
        LockerState {
            locker_number: locker,
            is_unlocked: self.is_unlocked(locker),
        }
    }

    /// States for `lockers`, in the order given
    pub fn snapshot(&self, lockers: impl IntoIterator<Item = i32>) -> Vec<LockerState> {
        lockers.into_iter().map(|n| self.state(n)).collect()
    }

    /// Number of lockers currently latched unlocked
    pub fn unlocked_count(&self) -> usize {
        self.states.iter().filter(|e| *e.value()).count()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_is_locked() {
        let cache = LockerStateCache::new();
        assert!(!cache.is_unlocked(7));

        cache.mark_unlocked(7);
        assert!(cache.is_unlocked(7));
        cache.mark_locked(7);
        assert!(!cache.is_unlocked(7));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let cache = LockerStateCache::new();
        cache.mark_unlocked(2);

        let rows = cache.snapshot(1..=3);
        assert_eq!(rows.len(), 3);
        assert!(rows[1].is_unlocked);
        assert_eq!(cache.unlocked_count(), 1);

        let json = serde_json::to_string(&rows[1]).unwrap();
        assert_eq!(json, r#"{"lockerNumber":2,"isUnlocked":true}"#);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = Arc::new(LockerStateCache::new());
        let mut tasks = Vec::new();
        for n in 0..64 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                if n % 2 == 0 {
                    cache.mark_unlocked(n);
                } else {
                    cache.mark_locked(n);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cache.unlocked_count(), 32);
    }
}
