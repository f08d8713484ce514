//! HeartbeatStore in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use symphony_core::store::{AppScope, HeartbeatStore, StoreError};
use symphony_core::types::{Heartbeat, HeartbeatRun};

/// In-memory heartbeat and run store.
#[derive(Default)]
pub struct InMemoryHeartbeatStore {
    heartbeats: RwLock<HashMap<String, Heartbeat>>,
    runs: RwLock<HashMap<String, HeartbeatRun>>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn upsert(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        let mut heartbeats = self
            .heartbeats
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        heartbeats.insert(heartbeat.id.clone(), heartbeat.clone());
        Ok(())
    }

    async fn get(
        &self,
        heartbeat_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<Heartbeat>, StoreError> {
        let heartbeats = self
            .heartbeats
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(heartbeats
            .get(heartbeat_id)
            .filter(|hb| AppScope::permits(scope, hb.app_id.as_deref()))
            .cloned())
    }

    async fn delete(
        &self,
        heartbeat_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<bool, StoreError> {
        let mut heartbeats = self
            .heartbeats
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let permitted = heartbeats
            .get(heartbeat_id)
            .map(|hb| AppScope::permits(scope, hb.app_id.as_deref()))
            .unwrap_or(false);
        if !permitted {
            return Ok(false);
        }
        Ok(heartbeats.remove(heartbeat_id).is_some())
    }

    async fn list(&self, scope: Option<&AppScope>) -> Result<Vec<Heartbeat>, StoreError> {
        let heartbeats = self
            .heartbeats
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut entries: Vec<Heartbeat> = heartbeats
            .values()
            .filter(|hb| AppScope::permits(scope, hb.app_id.as_deref()))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn list_active(&self) -> Result<Vec<Heartbeat>, StoreError> {
        let heartbeats = self
            .heartbeats
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut entries: Vec<Heartbeat> =
            heartbeats.values().filter(|hb| hb.is_active).cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn create_run(&self, run: &HeartbeatRun) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!("run {} exists", run.id)));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &HeartbeatRun) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if !runs.contains_key(&run.id) {
            return Err(StoreError::NotFound(run.id.clone()));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn find_run_for_minute(
        &self,
        heartbeat_id: &str,
        fire_minute: &str,
    ) -> Result<Option<HeartbeatRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(runs
            .values()
            .find(|run| run.heartbeat_id == heartbeat_id && run.fire_minute == fire_minute)
            .cloned())
    }

    async fn list_runs(
        &self,
        heartbeat_id: &str,
        limit: usize,
    ) -> Result<Vec<HeartbeatRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut entries: Vec<HeartbeatRun> = runs
            .values()
            .filter(|run| run.heartbeat_id == heartbeat_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn heartbeat(id: &str, app_id: Option<&str>) -> Heartbeat {
        Heartbeat {
            id: id.to_string(),
            app_id: app_id.map(str::to_string),
            user_id: None,
            name: format!("hb-{}", id),
            query_template: "daily check for {date}".to_string(),
            cron_expression: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
            context_template: None,
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_lookup_by_fire_minute() {
        tokio_test::block_on(async {
            let store = InMemoryHeartbeatStore::new();
            store.upsert(&heartbeat("h1", None)).await.unwrap();

            let run = HeartbeatRun::new("h1", "2026-08-02T09:00");
            store.create_run(&run).await.unwrap();

            let found = store
                .find_run_for_minute("h1", "2026-08-02T09:00")
                .await
                .unwrap();
            assert!(found.is_some());

            let missing = store
                .find_run_for_minute("h1", "2026-08-02T09:01")
                .await
                .unwrap();
            assert!(missing.is_none());
        });
    }

    #[test]
    fn test_heartbeat_scoping() {
        tokio_test::block_on(async {
            let store = InMemoryHeartbeatStore::new();
            store.upsert(&heartbeat("h1", Some("app-a"))).await.unwrap();
            store.upsert(&heartbeat("h2", Some("app-b"))).await.unwrap();

            let scope = AppScope::new("app-a");
            let visible = store.list(Some(&scope)).await.unwrap();
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].id, "h1");

            assert!(!store.delete("h2", Some(&scope)).await.unwrap());
            assert!(store.delete("h1", Some(&scope)).await.unwrap());
        });
    }
}
