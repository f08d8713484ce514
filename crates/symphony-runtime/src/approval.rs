//! Pending plan store for trust-level-0 tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use symphony_core::store::AppScope;
use symphony_core::types::{TaskPlan, TaskRequest};

/// A plan held until the caller approves or cancels it.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub plan: TaskPlan,
    pub request: TaskRequest,
    pub scope: Option<AppScope>,
    pub created_at: DateTime<Utc>,
}

/// Keyed map of task_id -> pending plan, behind one coarse mutex.
#[derive(Default)]
pub struct ApprovalStore {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingApproval>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, plan: TaskPlan, request: TaskRequest, scope: Option<AppScope>) {
        let task_id = plan.task_id.clone();
        self.lock().insert(
            task_id,
            PendingApproval {
                plan,
                request,
                scope,
                created_at: Utc::now(),
            },
        );
    }

    /// Remove and return the pending approval; `None` on double-approve.
    pub fn take(&self, task_id: &str) -> Option<PendingApproval> {
        self.lock().remove(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<PendingApproval> {
        self.lock().get(task_id).cloned()
    }

    pub fn is_pending(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_core::types::ProcessType;

    fn plan(task_id: &str) -> TaskPlan {
        TaskPlan {
            task_id: task_id.to_string(),
            query: "q".to_string(),
            instrument: "note".to_string(),
            process_type: ProcessType::Autonomic,
            estimated_iterations: 1,
            description: "plan".to_string(),
            requires_approval: true,
        }
    }

    #[test]
    fn test_take_is_single_shot() {
        let store = ApprovalStore::new();
        store.insert(plan("t1"), TaskRequest::new("q"), None);

        assert!(store.is_pending("t1"));
        assert!(store.take("t1").is_some());
        // Double-approve finds nothing to execute.
        assert!(store.take("t1").is_none());
        assert!(!store.is_pending("t1"));
    }
}
