//! Advisory per-group in-flight set.
//!
//! Prevents the poll loop from spawning a second reply task for a group
//! whose previous message is still being processed. Purely in-process
//! bookkeeping; the surface lock is what protects the actual UI.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

#[derive(Clone, Default)]
pub struct InFlight {
    groups: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a group as busy. Returns `None` if it already is.
    #[must_use]
    pub fn try_begin(&self, group: &str) -> Option<InFlightGuard> {
        let mut groups = self.groups.lock().ok()?;
        if !groups.insert(group.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            groups: Arc::clone(&self.groups),
            group: group.to_string(),
        })
    }

    /// Is this group currently being processed?
    #[must_use]
    pub fn contains(&self, group: &str) -> bool {
        self.groups.lock().map(|g| g.contains(group)).unwrap_or(false)
    }

    /// Number of groups currently being processed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().map(|g| g.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clears the group's busy flag on drop.
pub struct InFlightGuard {
    groups: Arc<Mutex<HashSet<String>>>,
    group: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut groups) = self.groups.lock() {
            groups.remove(&self.group);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_group_is_rejected() {
        let inflight = InFlight::new();
        let guard = inflight.try_begin("Sales").unwrap();
        assert!(inflight.try_begin("Sales").is_none());
        drop(guard);
        assert!(inflight.try_begin("Sales").is_some());
    }

    #[test]
    fn groups_are_independent() {
        let inflight = InFlight::new();
        let _a = inflight.try_begin("Sales").unwrap();
        let _b = inflight.try_begin("Support").unwrap();
        assert_eq!(inflight.len(), 2);
    }

    #[test]
    fn contains_reflects_active_guards() {
        let inflight = InFlight::new();
        assert!(!inflight.contains("Sales"));
        let guard = inflight.try_begin("Sales").unwrap();
        assert!(inflight.contains("Sales"));
        drop(guard);
        assert!(!inflight.contains("Sales"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_begins_admit_exactly_one() {
        let inflight = InFlight::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let inflight = inflight.clone();
            handles.push(tokio::spawn(async move { inflight.try_begin("Sales") }));
        }

        // Join everything before dropping any guard, so a released slot
        // cannot be re-won mid-race.
        let mut guards = Vec::new();
        for handle in handles {
            if let Some(guard) = handle.await.unwrap() {
                guards.push(guard);
            }
        }
        assert_eq!(guards.len(), 1);

        drop(guards);
        assert!(inflight.is_empty());
    }
}
