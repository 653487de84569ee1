use std::sync::Arc;

use mleval_registry::{CompletionTracker, ModelRegistry};
use mleval_scheduler::{HostPool, HostScheduler};

use crate::forward::Forwarder;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub scheduler: Arc<HostScheduler>,
    pub tracker: Arc<CompletionTracker>,
    pub forwarder: Arc<Forwarder>,
    pub metrics: Arc<Metrics>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(pool: HostPool, http: reqwest::Client, max_upload_bytes: usize) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let scheduler = Arc::new(HostScheduler::new(pool));
        let tracker = Arc::new(CompletionTracker::new());
        let metrics = Arc::new(Metrics::default());
        let forwarder = Arc::new(Forwarder::new(
            http,
            registry.clone(),
            scheduler.clone(),
            tracker.clone(),
            metrics.clone(),
        ));

        Self {
            registry,
            scheduler,
            tracker,
            forwarder,
            metrics,
            max_upload_bytes,
        }
    }
}
