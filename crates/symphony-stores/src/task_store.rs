//! TaskStore in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use symphony_core::store::{AppScope, StoreError, TaskStore};
use symphony_core::types::{TaskRecord, TaskResponse, TaskStatus};

const DEFAULT_IN_MEMORY_TASK_LIMIT: usize = 5_000;

/// In-memory task store with a hard capacity limit.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, TaskRecord>>,
    order: RwLock<VecDeque<String>>,
    max_tasks: usize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_max_tasks(DEFAULT_IN_MEMORY_TASK_LIMIT)
    }

    pub fn with_max_tasks(max_tasks: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_tasks: max_tasks.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, task_id: &str) {
        order.retain(|id| id != task_id);
        order.push_back(task_id.to_string());
    }

    fn mutate<F>(&self, task_id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), StoreError>,
    {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "task {} is already terminal ({})",
                task_id,
                record.status.as_str()
            )));
        }
        apply(record)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if tasks.contains_key(record.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "task {} already exists",
                record.id
            )));
        }
        if tasks.len() >= self.max_tasks {
            if let Some(oldest_id) = order.pop_front() {
                tasks.remove(&oldest_id);
            }
        }
        tasks.insert(record.id.clone(), record.clone());
        Self::touch_order(&mut order, record.id.as_str());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(tasks.get(task_id).cloned())
    }

    async fn get_scoped(
        &self,
        task_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(tasks
            .get(task_id)
            .filter(|record| AppScope::permits(scope, record.app_id.as_deref()))
            .cloned())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
        self.mutate(task_id, |record| {
            record.set_status(status);
            Ok(())
        })
    }

    async fn complete(&self, task_id: &str, response: &TaskResponse) -> Result<(), StoreError> {
        self.mutate(task_id, |record| {
            record.response = Some(response.clone());
            record.set_status(TaskStatus::Complete);
            Ok(())
        })
    }

    async fn fail(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
        self.mutate(task_id, |record| {
            record.error = Some(error.to_string());
            record.set_status(TaskStatus::Failed);
            Ok(())
        })
    }

    async fn cancel(&self, task_id: &str) -> Result<(), StoreError> {
        self.mutate(task_id, |record| {
            record.set_status(TaskStatus::Cancelled);
            Ok(())
        })
    }

    async fn list_recent(
        &self,
        scope: Option<&AppScope>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .filter(|record| AppScope::permits(scope, record.app_id.as_deref()))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_active(&self, scope: Option<&AppScope>) -> Result<Vec<TaskRecord>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .filter(|record| !record.status.is_terminal())
            .filter(|record| AppScope::permits(scope, record.app_id.as_deref()))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_core::types::{TaskContext, TaskRequest};

    fn record_for_app(app_id: Option<&str>) -> TaskRecord {
        let mut request = TaskRequest::new("question");
        if let Some(app_id) = app_id {
            let mut context = TaskContext::default();
            context.app_id = Some(app_id.to_string());
            request = request.with_context(context);
        }
        TaskRecord::new(request, TaskStatus::Pending)
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let record = record_for_app(None);
            store.create(&record).await.unwrap();

            store.cancel(&record.id).await.unwrap();
            let err = store
                .update_status(&record.id, TaskStatus::Running)
                .await
                .expect_err("terminal records are immutable");
            assert!(matches!(err, StoreError::Conflict(_)));

            let err = store.fail(&record.id, "late failure").await.unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
        });
    }

    #[test]
    fn test_scoped_reads_enforce_app_isolation() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let record_a = record_for_app(Some("app-a"));
            let record_b = record_for_app(Some("app-b"));
            let record_anon = record_for_app(None);
            store.create(&record_a).await.unwrap();
            store.create(&record_b).await.unwrap();
            store.create(&record_anon).await.unwrap();

            let scope_a = AppScope::new("app-a");
            let visible = store.list_recent(Some(&scope_a), 10).await.unwrap();
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].app_id.as_deref(), Some("app-a"));

            // Cross-app point lookup is filtered too.
            let hidden = store.get_scoped(&record_b.id, Some(&scope_a)).await.unwrap();
            assert!(hidden.is_none());

            // Unauthenticated reads only see unstamped rows.
            let anon = store.list_recent(None, 10).await.unwrap();
            assert_eq!(anon.len(), 1);
            assert!(anon[0].app_id.is_none());
        });
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::with_max_tasks(2);
            let r1 = record_for_app(None);
            let r2 = record_for_app(None);
            let r3 = record_for_app(None);
            store.create(&r1).await.unwrap();
            store.create(&r2).await.unwrap();
            store.create(&r3).await.unwrap();

            assert!(store.get(&r1.id).await.unwrap().is_none());
            assert!(store.get(&r2.id).await.unwrap().is_some());
            assert!(store.get(&r3.id).await.unwrap().is_some());
        });
    }
}
