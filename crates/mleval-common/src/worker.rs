use serde::{Deserialize, Serialize};

/// A configured worker node and the number of models placed on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerDescriptor {
    /// Base URL, without a trailing slash.
    #[serde(rename = "serverId")]
    pub endpoint: String,
    #[serde(rename = "modelCount")]
    pub assigned_model_count: i32,
}

impl WorkerDescriptor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            assigned_model_count: 0,
        }
    }
}

/// Parse a comma-separated host list (the `HOSTS` variable) into descriptors,
/// preserving configuration order. Blank entries are dropped.
pub fn parse_hosts(raw: &str) -> Vec<WorkerDescriptor> {
    raw.split(',')
        .map(|h| h.trim().trim_end_matches('/'))
        .filter(|h| !h.is_empty())
        .map(WorkerDescriptor::new)
        .collect()
}
