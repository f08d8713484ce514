//! ArrangementStore in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use symphony_core::store::{AppScope, ArrangementStore, StoreError};
use symphony_core::types::SavedArrangement;

/// In-memory saved arrangement store.
#[derive(Default)]
pub struct InMemoryArrangementStore {
    arrangements: RwLock<HashMap<String, SavedArrangement>>,
}

impl InMemoryArrangementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArrangementStore for InMemoryArrangementStore {
    async fn save(&self, arrangement: &SavedArrangement) -> Result<(), StoreError> {
        let mut arrangements = self
            .arrangements
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        arrangements.insert(arrangement.id.clone(), arrangement.clone());
        Ok(())
    }

    async fn get(
        &self,
        arrangement_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<SavedArrangement>, StoreError> {
        let arrangements = self
            .arrangements
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(arrangements
            .get(arrangement_id)
            .filter(|arrangement| AppScope::permits(scope, arrangement.app_id.as_deref()))
            .cloned())
    }

    async fn list(&self, scope: Option<&AppScope>) -> Result<Vec<SavedArrangement>, StoreError> {
        let arrangements = self
            .arrangements
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut entries: Vec<SavedArrangement> = arrangements
            .values()
            .filter(|arrangement| AppScope::permits(scope, arrangement.app_id.as_deref()))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}
