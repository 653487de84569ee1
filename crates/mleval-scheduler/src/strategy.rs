use mleval_common::WorkerDescriptor;

/// Trait for pluggable placement strategies.
/// The scheduler hands over every configured worker in configuration order
/// and records the assignment for whichever index comes back.
pub trait PlacementStrategy: Send + Sync {
    /// Select one worker. Returns the index into `workers`, or `None` when empty.
    fn select(&self, workers: &[WorkerDescriptor]) -> Option<usize>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// LeastLoaded: pick the worker with fewest assigned models.
// Ties go to the worker configured first.
// ---------------------------------------------------------------------------

pub struct LeastLoaded;

impl PlacementStrategy for LeastLoaded {
    fn select(&self, workers: &[WorkerDescriptor]) -> Option<usize> {
        let mut best_idx: Option<usize> = None;
        let mut best_count = i32::MAX;

        for (i, w) in workers.iter().enumerate() {
            // strict `<` keeps the earliest of equally loaded workers
            if best_idx.is_none() || w.assigned_model_count < best_count {
                best_count = w.assigned_model_count;
                best_idx = Some(i);
            }
        }

        best_idx
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_worker(endpoint: &str, count: i32) -> WorkerDescriptor {
        WorkerDescriptor {
            endpoint: endpoint.to_string(),
            assigned_model_count: count,
        }
    }

    #[test]
    fn test_least_loaded() {
        let workers = vec![
            make_worker("http://a", 4),
            make_worker("http://b", 1),
            make_worker("http://c", 2),
        ];
        assert_eq!(LeastLoaded.select(&workers), Some(1));
    }

    #[test]
    fn test_least_loaded_tie_prefers_first() {
        let workers = vec![
            make_worker("http://a", 3),
            make_worker("http://b", 2),
            make_worker("http://c", 2),
        ];
        assert_eq!(LeastLoaded.select(&workers), Some(1));
    }

    #[test]
    fn test_least_loaded_saturated_worker_still_selectable() {
        let workers = vec![make_worker("http://a", i32::MAX)];
        assert_eq!(LeastLoaded.select(&workers), Some(0));
    }

    #[test]
    fn test_least_loaded_empty() {
        assert_eq!(LeastLoaded.select(&[]), None);
    }
}
