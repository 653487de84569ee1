use dashmap::DashMap;
use mleval_common::ModelId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("model {0} was never dispatched")]
    NotFound(ModelId),
}

/// Per-model completion latch for long-running load/train dispatches.
///
/// `false` means pending, `true` means a worker reported completion. A model
/// without an entry was never dispatched (or its failed dispatch was cleared).
#[derive(Debug, Default)]
pub struct CompletionTracker {
    status: DashMap<ModelId, bool>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new latch for a dispatch. Called once per dispatch, before the
    /// outbound call is issued.
    pub fn mark_pending(&self, id: ModelId) {
        self.status.insert(id, false);
        tracing::debug!(model_id = id, "dispatch pending");
    }

    /// Close the latch. Marking an already-done model is a no-op.
    pub fn mark_done(&self, id: ModelId) -> Result<(), TrackerError> {
        let mut entry = self.status.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        if !*entry {
            *entry = true;
            tracing::info!(model_id = id, "dispatch completed");
        }
        Ok(())
    }

    pub fn status_of(&self, id: ModelId) -> Result<bool, TrackerError> {
        self.status
            .get(&id)
            .map(|done| *done)
            .ok_or(TrackerError::NotFound(id))
    }

    /// Drop the latch of a dispatch that never reached its worker.
    /// Returns whether an entry existed.
    pub fn clear(&self, id: ModelId) -> bool {
        self.status.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_after_pending() {
        let tracker = CompletionTracker::new();
        tracker.mark_pending(3);
        assert_eq!(tracker.status_of(3), Ok(false));

        tracker.mark_done(3).unwrap();
        assert_eq!(tracker.status_of(3), Ok(true));
    }

    #[test]
    fn test_done_without_pending_is_not_found() {
        let tracker = CompletionTracker::new();
        assert_eq!(tracker.mark_done(9), Err(TrackerError::NotFound(9)));
        assert_eq!(tracker.status_of(9), Err(TrackerError::NotFound(9)));
    }

    #[test]
    fn test_done_is_idempotent() {
        let tracker = CompletionTracker::new();
        tracker.mark_pending(1);
        tracker.mark_done(1).unwrap();
        tracker.mark_done(1).unwrap();
        assert_eq!(tracker.status_of(1), Ok(true));
    }

    #[test]
    fn test_new_dispatch_reopens_latch() {
        let tracker = CompletionTracker::new();
        tracker.mark_pending(1);
        tracker.mark_done(1).unwrap();
        tracker.mark_pending(1);
        assert_eq!(tracker.status_of(1), Ok(false));
    }

    #[test]
    fn test_clear_forgets_dispatch() {
        let tracker = CompletionTracker::new();
        tracker.mark_pending(5);
        assert!(tracker.clear(5));
        assert!(!tracker.clear(5));
        assert_eq!(tracker.status_of(5), Err(TrackerError::NotFound(5)));
    }
}
