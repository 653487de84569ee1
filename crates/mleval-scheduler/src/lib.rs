use std::collections::HashMap;

use mleval_common::{parse_hosts, ModelId, WorkerDescriptor};
use thiserror::Error;
use tokio::sync::RwLock;

pub mod strategy;

use strategy::{LeastLoaded, PlacementStrategy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The pool has no configured workers.
    #[error("no workers available")]
    NoWorkersAvailable,
    /// The model was never forwarded to a worker.
    #[error("model {0} is not assigned to any worker")]
    NotAssigned(ModelId),
}

/// The fixed set of workers, in configuration order. Never grows or shrinks
/// after startup; only the load counters change.
#[derive(Debug, Clone, Default)]
pub struct HostPool {
    workers: Vec<WorkerDescriptor>,
}

impl HostPool {
    pub fn new(workers: Vec<WorkerDescriptor>) -> Self {
        Self { workers }
    }

    /// Build from a comma-separated list of base URLs.
    pub fn from_hosts(raw: &str) -> Self {
        Self::new(parse_hosts(raw))
    }

    pub fn workers(&self) -> &[WorkerDescriptor] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn select(&self, strategy: &dyn PlacementStrategy) -> Result<usize, SchedulerError> {
        strategy
            .select(&self.workers)
            .filter(|&i| i < self.workers.len())
            .ok_or(SchedulerError::NoWorkersAvailable)
    }
}

/// Places models onto workers and remembers where each one went.
///
/// Pool counters and the assignment relation share one lock so that
/// lookup, selection, recording and increment happen as a single step.
/// Placement is greedy at assignment time; existing assignments are never
/// migrated.
pub struct HostScheduler {
    inner: RwLock<Inner>,
    strategy: Box<dyn PlacementStrategy>,
}

struct Inner {
    pool: HostPool,
    /// model id → index into `pool.workers`
    assignments: HashMap<ModelId, usize>,
}

impl std::fmt::Debug for HostScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostScheduler")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl HostScheduler {
    pub fn new(pool: HostPool) -> Self {
        Self::with_strategy(pool, Box::new(LeastLoaded))
    }

    pub fn with_strategy(pool: HostPool, strategy: Box<dyn PlacementStrategy>) -> Self {
        tracing::info!(
            strategy = strategy.name(),
            workers = pool.len(),
            "scheduler initialized"
        );
        Self {
            inner: RwLock::new(Inner {
                pool,
                assignments: HashMap::new(),
            }),
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// The worker a new model would be placed on right now.
    pub async fn least_loaded_worker(&self) -> Result<WorkerDescriptor, SchedulerError> {
        let inner = self.inner.read().await;
        let idx = inner.pool.select(self.strategy.as_ref())?;
        Ok(inner.pool.workers[idx].clone())
    }

    /// Return the endpoint holding `id`, placing the model first if needed.
    /// A model already placed keeps its worker and adds no load.
    pub async fn assign_or_get(&self, id: ModelId) -> Result<String, SchedulerError> {
        let mut inner = self.inner.write().await;

        if let Some(&idx) = inner.assignments.get(&id) {
            let endpoint = inner.pool.workers[idx].endpoint.clone();
            tracing::debug!(model_id = id, host = %endpoint, "found existing host for model");
            return Ok(endpoint);
        }

        let idx = inner.pool.select(self.strategy.as_ref())?;
        inner.assignments.insert(id, idx);
        let worker = &mut inner.pool.workers[idx];
        worker.assigned_model_count = worker.assigned_model_count.saturating_add(1);

        tracing::info!(
            model_id = id,
            host = %worker.endpoint,
            model_count = worker.assigned_model_count,
            "assigned model to host"
        );
        Ok(worker.endpoint.clone())
    }

    pub async fn worker_for(&self, id: ModelId) -> Result<WorkerDescriptor, SchedulerError> {
        let inner = self.inner.read().await;
        inner
            .assignments
            .get(&id)
            .map(|&idx| inner.pool.workers[idx].clone())
            .ok_or(SchedulerError::NotAssigned(id))
    }

    /// Snapshot of the pool, in configuration order.
    pub async fn workers(&self) -> Vec<WorkerDescriptor> {
        self.inner.read().await.pool.workers.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn pool(endpoints: &[&str]) -> HostPool {
        HostPool::new(endpoints.iter().map(|e| WorkerDescriptor::new(*e)).collect())
    }

    fn counts(workers: &[WorkerDescriptor]) -> Vec<i32> {
        workers.iter().map(|w| w.assigned_model_count).collect()
    }

    #[tokio::test]
    async fn test_empty_pool_has_no_workers() {
        let scheduler = HostScheduler::new(HostPool::from_hosts(""));
        assert_eq!(
            scheduler.least_loaded_worker().await,
            Err(SchedulerError::NoWorkersAvailable)
        );
        assert_eq!(
            scheduler.assign_or_get(0).await,
            Err(SchedulerError::NoWorkersAvailable)
        );
        // a failed placement records nothing
        assert_eq!(
            scheduler.worker_for(0).await,
            Err(SchedulerError::NotAssigned(0))
        );
    }

    #[tokio::test]
    async fn test_least_loaded_worker_has_minimum_count() {
        let scheduler = HostScheduler::new(HostPool::new(vec![
            WorkerDescriptor {
                endpoint: "http://a".to_string(),
                assigned_model_count: 5,
            },
            WorkerDescriptor {
                endpoint: "http://b".to_string(),
                assigned_model_count: 2,
            },
            WorkerDescriptor {
                endpoint: "http://c".to_string(),
                assigned_model_count: 7,
            },
        ]));
        let w = scheduler.least_loaded_worker().await.unwrap();
        assert_eq!(w.endpoint, "http://b");
        assert_eq!(w.assigned_model_count, 2);
    }

    #[tokio::test]
    async fn test_assign_or_get_is_idempotent() {
        let scheduler = HostScheduler::new(pool(&["http://a", "http://b"]));
        let first = scheduler.assign_or_get(11).await.unwrap();
        let second = scheduler.assign_or_get(11).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counts(&scheduler.workers().await), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_two_worker_scenario_alternates_then_ties_to_first() {
        let scheduler = HostScheduler::new(pool(&["http://a", "http://b"]));

        assert_eq!(scheduler.assign_or_get(1).await.unwrap(), "http://a");
        assert_eq!(scheduler.assign_or_get(2).await.unwrap(), "http://b");
        assert_eq!(scheduler.assign_or_get(3).await.unwrap(), "http://a");
        assert_eq!(counts(&scheduler.workers().await), vec![2, 1]);

        assert_eq!(scheduler.worker_for(2).await.unwrap().endpoint, "http://b");
    }

    #[tokio::test]
    async fn test_worker_for_unassigned_model() {
        let scheduler = HostScheduler::new(pool(&["http://a"]));
        scheduler.assign_or_get(1).await.unwrap();
        assert_eq!(
            scheduler.worker_for(42).await,
            Err(SchedulerError::NotAssigned(42))
        );
    }

    #[tokio::test]
    async fn test_concurrent_assignments_split_evenly() {
        let scheduler = Arc::new(HostScheduler::new(pool(&["http://a", "http://b"])));

        let mut handles = Vec::new();
        for id in 0..100 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler.assign_or_get(id).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let workers = scheduler.workers().await;
        assert_eq!(counts(&workers), vec![50, 50]);
        assert_eq!(workers.iter().map(|w| w.assigned_model_count).sum::<i32>(), 100);
    }

    #[tokio::test]
    async fn test_count_matches_distinct_assigned_models() {
        let scheduler = HostScheduler::new(pool(&["http://a", "http://b", "http://c"]));
        for id in [4, 4, 5, 6, 5, 7, 4] {
            scheduler.assign_or_get(id).await.unwrap();
        }

        let workers = scheduler.workers().await;
        for w in &workers {
            let mut placed = 0;
            for id in [4, 5, 6, 7] {
                if scheduler.worker_for(id).await.unwrap().endpoint == w.endpoint {
                    placed += 1;
                }
            }
            assert_eq!(w.assigned_model_count, placed);
        }
        assert_eq!(counts(&workers), vec![2, 1, 1]);
    }
}
