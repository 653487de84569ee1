use std::collections::BTreeMap;

use mleval_common::{IoSchema, ModelId, ModelRecord};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model {0} not found")]
    NotFound(ModelId),

    #[error("model id space exhausted")]
    IdSpaceExhausted,
}

/// Append-only store of model records.
///
/// Ids are assigned here, start at 0 and strictly increase; nothing is ever
/// removed, so no id is reused.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: ModelId,
    records: BTreeMap<ModelId, ModelRecord>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        io_params: Option<IoSchema>,
    ) -> Result<ModelId, RegistryError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id = id.checked_add(1).ok_or(RegistryError::IdSpaceExhausted)?;

        let record = ModelRecord {
            id,
            name: name.into(),
            description: description.into(),
            io_params: io_params.unwrap_or_default(),
        };
        tracing::info!(model_id = id, name = %record.name, "model registered");
        inner.records.insert(id, record);
        Ok(id)
    }

    pub async fn get(&self, id: ModelId) -> Result<ModelRecord, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Snapshot of every record, keyed by id.
    pub async fn list(&self) -> BTreeMap<ModelId, ModelRecord> {
        self.inner.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
