//! Per-run progress with bounded retention.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lore_core::{Clock, EphemeralStore, RunStatus, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Queued,
    Classifying,
    Relating,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub current: usize,
    pub total: usize,
    pub label: Option<String>,
    pub status: RunStatus,
}

impl RunProgress {
    pub fn queued(run_id: Uuid) -> Self {
        Self {
            run_id,
            phase: RunPhase::Queued,
            current: 0,
            total: 0,
            label: None,
            status: RunStatus::Pending,
        }
    }
}

/// Outcome of a progress query. `NotFound` covers both unknown runs and
/// runs whose progress has aged out; it never means "still running".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLookup {
    Found(RunProgress),
    NotFound,
}

impl ProgressLookup {
    pub fn found(self) -> Option<RunProgress> {
        match self {
            Self::Found(p) => Some(p),
            Self::NotFound => None,
        }
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<EphemeralStore<Uuid, RunProgress>>,
}

impl ProgressTracker {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(EphemeralStore::new(retention, clock)),
        }
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self::new(retention, Arc::new(SystemClock))
    }

    pub fn update(&self, progress: RunProgress) {
        self.store.insert(progress.run_id, progress);
    }

    /// Record a phase position, keeping `current` monotonic within a phase.
    pub fn advance(
        &self,
        run_id: Uuid,
        phase: RunPhase,
        current: usize,
        total: usize,
        label: Option<String>,
    ) {
        let current = match self.store.get(&run_id) {
            Some(prev) if prev.phase == phase => current.max(prev.current),
            _ => current,
        };
        self.update(RunProgress {
            run_id,
            phase,
            current,
            total,
            label,
            status: RunStatus::Running,
        });
    }

    pub fn finish(&self, run_id: Uuid, status: RunStatus) {
        let mut progress = self
            .store
            .get(&run_id)
            .unwrap_or_else(|| RunProgress::queued(run_id));
        progress.phase = RunPhase::Finished;
        progress.current = progress.total;
        progress.label = None;
        progress.status = status;
        self.update(progress);
    }

    pub fn lookup(&self, run_id: Uuid) -> ProgressLookup {
        match self.store.get(&run_id) {
            Some(p) => ProgressLookup::Found(p),
            None => ProgressLookup::NotFound,
        }
    }

    pub fn forget(&self, run_id: Uuid) {
        self.store.remove(&run_id);
    }

    /// Drop expired progress records.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::ManualClock;

    fn tracker() -> (Arc<ManualClock>, ProgressTracker) {
        let clock = Arc::new(ManualClock::new());
        let tracker = ProgressTracker::new(Duration::from_secs(60), clock.clone());
        (clock, tracker)
    }

    #[test]
    fn test_current_never_decreases_within_phase() {
        let (_, tracker) = tracker();
        let id = Uuid::new_v4();
        tracker.advance(id, RunPhase::Classifying, 10, 20, None);
        tracker.advance(id, RunPhase::Classifying, 5, 20, None);
        assert_eq!(tracker.lookup(id).found().map(|p| p.current), Some(10));

        tracker.advance(id, RunPhase::Relating, 0, 20, None);
        assert_eq!(tracker.lookup(id).found().map(|p| p.current), Some(0));
    }

    #[test]
    fn test_finished_progress_is_kept_until_retention_ends() {
        let (clock, tracker) = tracker();
        let id = Uuid::new_v4();
        tracker.advance(id, RunPhase::Relating, 3, 8, Some("Old Tam".into()));
        tracker.finish(id, RunStatus::Completed);

        let done = tracker.lookup(id).found().expect("retained");
        assert_eq!(done.phase, RunPhase::Finished);
        assert_eq!(done.current, 8);
        assert_eq!(done.status, RunStatus::Completed);

        clock.advance(Duration::from_secs(61));
        assert_eq!(tracker.lookup(id), ProgressLookup::NotFound);
        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let (_, tracker) = tracker();
        assert_eq!(tracker.lookup(Uuid::new_v4()), ProgressLookup::NotFound);
    }
}
