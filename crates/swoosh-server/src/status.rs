//! Latest-known workflow status.
//!
//! The hub keeps the last emitted event per workflow in a bounded
//! [`SnapshotCache`] so a subscriber joining mid-flight is brought up to date
//! immediately. When the cache has nothing, an optional [`StatusSource`]
//! (e.g. the intent indexer) is asked instead.

use std::collections::HashMap;

use async_trait::async_trait;
use swoosh_core::ProgressEvent;
use tracing::debug;

/// External lookup for a workflow's latest status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Latest known event for `workflow_id`, if any.
    async fn latest_status(&self, workflow_id: &str) -> Option<ProgressEvent>;
}

/// Source that never knows anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStatusSource;

#[async_trait]
impl StatusSource for NoStatusSource {
    async fn latest_status(&self, _workflow_id: &str) -> Option<ProgressEvent> {
        None
    }
}

/// Bounded map of workflow ID → last emitted event.
///
/// At capacity a terminal workflow is evicted first, otherwise the entry
/// with the oldest timestamp.
#[derive(Debug)]
pub struct SnapshotCache {
    entries: HashMap<String, ProgressEvent>,
    capacity: usize,
}

impl SnapshotCache {
    /// Create a cache holding at most `capacity` workflows.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Last event for `workflow_id`.
    pub fn get(&self, workflow_id: &str) -> Option<&ProgressEvent> {
        self.entries.get(workflow_id)
    }

    /// Record `event` as the latest for its workflow.
    pub fn insert(&mut self, event: ProgressEvent) {
        if !self.entries.contains_key(&event.workflow_id) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        let _ = self.entries.insert(event.workflow_id.clone(), event);
    }

    /// Number of cached workflows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .values()
            .min_by_key(|e| (!e.is_terminal(), e.timestamp))
            .map(|e| e.workflow_id.clone());
        if let Some(id) = victim {
            debug!(workflow_id = %id, "evicting progress snapshot");
            let _ = self.entries.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use swoosh_core::{ProgressUpdate, WorkflowStep};

    fn event(workflow_id: &str, step: WorkflowStep, secs: i64) -> ProgressEvent {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs);
        ProgressEvent::new(1, workflow_id, ProgressUpdate::new(step), ts)
    }

    #[test]
    fn insert_replaces_per_workflow() {
        let mut cache = SnapshotCache::new(4);
        cache.insert(event("a", WorkflowStep::Routing, 0));
        cache.insert(event("a", WorkflowStep::Bridging, 1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().step, WorkflowStep::Bridging);
    }

    #[test]
    fn evicts_terminal_before_active() {
        let mut cache = SnapshotCache::new(2);
        cache.insert(event("old_active", WorkflowStep::Routing, 0));
        cache.insert(event("done", WorkflowStep::Completed, 10));
        cache.insert(event("new", WorkflowStep::Pending, 20));
        assert!(cache.get("done").is_none());
        assert!(cache.get("old_active").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_oldest_when_none_terminal() {
        let mut cache = SnapshotCache::new(2);
        cache.insert(event("first", WorkflowStep::Routing, 0));
        cache.insert(event("second", WorkflowStep::Routing, 5));
        cache.insert(event("third", WorkflowStep::Routing, 9));
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
    }

    #[test]
    fn updating_existing_entry_does_not_evict() {
        let mut cache = SnapshotCache::new(1);
        cache.insert(event("a", WorkflowStep::Routing, 0));
        cache.insert(event("a", WorkflowStep::Bridging, 1));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn no_status_source_is_empty() {
        assert!(NoStatusSource.latest_status("abc").await.is_none());
    }

    #[tokio::test]
    async fn mock_status_source() {
        let mut mock = MockStatusSource::new();
        let _ = mock
            .expect_latest_status()
            .withf(|wf| wf == "abc")
            .returning(|wf| Some(event(wf, WorkflowStep::Validating, 0)));
        let got = mock.latest_status("abc").await.unwrap();
        assert_eq!(got.step, WorkflowStep::Validating);
    }
}
