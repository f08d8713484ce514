//! CheckpointStore in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use symphony_core::store::{CheckpointStore, StoreError};
use symphony_core::types::IterationCheckpoint;

/// In-memory checkpoint store.
///
/// Enforces the strictly-increasing, gapless iteration invariant per
/// task at the persistence boundary.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Vec<IterationCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn record(&self, checkpoint: &IterationCheckpoint) -> Result<(), StoreError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let entries = checkpoints
            .entry(checkpoint.task_id.clone())
            .or_default();

        let expected = entries.last().map(|c| c.iteration_num + 1).unwrap_or(1);
        if checkpoint.iteration_num != expected {
            return Err(StoreError::Conflict(format!(
                "task {} expected iteration {}, got {}",
                checkpoint.task_id, expected, checkpoint.iteration_num
            )));
        }

        entries.push(checkpoint.clone());
        Ok(())
    }

    async fn list(&self, task_id: &str) -> Result<Vec<IterationCheckpoint>, StoreError> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(checkpoints.get(task_id).cloned().unwrap_or_default())
    }
}
