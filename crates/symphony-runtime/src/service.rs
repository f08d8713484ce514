//! TaskService - the facade gluing the runtime together.
//!
//! Owns the submit/approve/cancel lifecycle: applies the trust gate,
//! persists task records, spawns supervised workers through the task
//! manager, wires checkpoint persistence and event emission into the
//! task context, and settles trust metrics on terminal transitions.
//! Workers are isolated: any failure classifies the task as failed and
//! emits exactly one terminal event; the service never crashes.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use symphony_core::store::{AppScope, CheckpointStore, StoreError, TaskStore};
use symphony_core::types::{
    TaskRecord, TaskRequest, TaskStatus, TaskSubmitResponse,
};

use crate::approval::ApprovalStore;
use crate::conductor::{Conductor, ConductorError};
use crate::error_tracker::ErrorTracker;
use crate::event_bus::{EventBus, TaskEvent};
use crate::task_manager::TaskManager;
use crate::trust::TrustTracker;

/// Service-level failures mapped onto the HTTP status surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Builder for the service facade.
pub struct TaskServiceBuilder {
    conductor: Arc<Conductor>,
    tasks: Arc<dyn TaskStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    manager: Arc<TaskManager>,
    bus: Arc<EventBus>,
    trust: Arc<TrustTracker>,
    approvals: Arc<ApprovalStore>,
    errors: Arc<ErrorTracker>,
}

impl TaskServiceBuilder {
    pub fn new(
        conductor: Arc<Conductor>,
        tasks: Arc<dyn TaskStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            conductor,
            tasks,
            checkpoints,
            manager: Arc::new(TaskManager::new()),
            bus: Arc::new(EventBus::new()),
            trust: Arc::new(TrustTracker::new()),
            approvals: Arc::new(ApprovalStore::new()),
            errors: Arc::new(ErrorTracker::new()),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_trust(mut self, trust: Arc<TrustTracker>) -> Self {
        self.trust = trust;
        self
    }

    pub fn build(self) -> Arc<TaskService> {
        Arc::new(TaskService {
            conductor: self.conductor,
            tasks: self.tasks,
            checkpoints: self.checkpoints,
            manager: self.manager,
            bus: self.bus,
            trust: self.trust,
            approvals: self.approvals,
            errors: self.errors,
        })
    }
}

/// The runtime facade used by the HTTP surface and the scheduler.
pub struct TaskService {
    conductor: Arc<Conductor>,
    tasks: Arc<dyn TaskStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    manager: Arc<TaskManager>,
    bus: Arc<EventBus>,
    trust: Arc<TrustTracker>,
    approvals: Arc<ApprovalStore>,
    errors: Arc<ErrorTracker>,
}

impl TaskService {
    pub fn conductor(&self) -> &Arc<Conductor> {
        &self.conductor
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn trust(&self) -> &Arc<TrustTracker> {
        &self.trust
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        &self.approvals
    }

    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    /// Submit a task: validate, stamp tenant identity, apply the trust
    /// gate, and either hold a plan or start a worker.
    pub async fn submit(
        self: &Arc<Self>,
        mut request: TaskRequest,
        scope: Option<AppScope>,
    ) -> Result<TaskSubmitResponse, ServiceError> {
        if request.query.trim().is_empty() {
            return Err(ServiceError::Validation("query must not be empty".to_string()));
        }
        if let Some(preferences) = &request.preferences {
            if let Some(level) = preferences.trust_level {
                if level > 2 {
                    return Err(ServiceError::Validation(
                        "trust_level must be 0, 1 or 2".to_string(),
                    ));
                }
            }
        }

        // Tenant identity comes from auth, never from the body.
        let mut context = request.context.take().unwrap_or_default();
        context.app_id = scope.as_ref().map(|s| s.app_id().to_string());
        context.user_id = scope.as_ref().and_then(|s| s.user_id().map(str::to_string));
        request.context = Some(context);

        let trust_level = self.effective_trust_level(&request, scope.as_ref());
        tracing::info!(
            task_id = %request.id,
            trust_level,
            "task submitted"
        );

        if trust_level == 0 {
            let plan = self.conductor.build_plan(&request);
            let record = TaskRecord::new(request.clone(), TaskStatus::AwaitingApproval);
            self.tasks.create(&record).await?;
            self.approvals.insert(plan.clone(), request, scope);
            return Ok(TaskSubmitResponse {
                task_id: record.id,
                status: TaskStatus::AwaitingApproval,
                message: "Plan awaiting approval".to_string(),
                plan: Some(plan),
            });
        }

        let record = TaskRecord::new(request.clone(), TaskStatus::Pending);
        self.tasks.create(&record).await?;
        self.spawn_worker(request, scope);

        Ok(TaskSubmitResponse {
            task_id: record.id,
            status: TaskStatus::Pending,
            message: "Task submitted successfully".to_string(),
            plan: None,
        })
    }

    /// Approve a held trust-0 plan. Idempotent: double-approve is a
    /// no-op returning the current status.
    pub async fn approve(
        self: &Arc<Self>,
        task_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<TaskSubmitResponse, ServiceError> {
        let record = self
            .tasks
            .get_scoped(task_id, scope)
            .await?
            .ok_or_else(|| ServiceError::NotFound(task_id.to_string()))?;

        if record.status != TaskStatus::AwaitingApproval {
            return Ok(TaskSubmitResponse {
                task_id: task_id.to_string(),
                status: record.status,
                message: "Task is not awaiting approval".to_string(),
                plan: None,
            });
        }

        let pending = self
            .approvals
            .take(task_id)
            .ok_or_else(|| ServiceError::Internal(format!("plan for {} vanished", task_id)))?;

        self.tasks.update_status(task_id, TaskStatus::Pending).await?;
        self.spawn_worker(pending.request, pending.scope);

        Ok(TaskSubmitResponse {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            message: "Plan approved; execution started".to_string(),
            plan: None,
        })
    }

    /// Cooperative cancel, accepted in any non-terminal state.
    pub async fn cancel(
        self: &Arc<Self>,
        task_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<TaskStatus, ServiceError> {
        let record = self
            .tasks
            .get_scoped(task_id, scope)
            .await?
            .ok_or_else(|| ServiceError::NotFound(task_id.to_string()))?;

        match record.status {
            status if status.is_terminal() => Ok(status),
            TaskStatus::Pending | TaskStatus::AwaitingApproval => {
                // No worker yet: cancel directly.
                self.approvals.take(task_id);
                self.tasks.cancel(task_id).await?;
                self.manager.mark_cancelled(task_id);
                self.bus.emit(TaskEvent::cancelled(task_id));
                Ok(TaskStatus::Cancelled)
            }
            _ => {
                // Running: signal the worker; it transitions the task at
                // the next iteration boundary.
                self.manager.cancel(task_id);
                Ok(TaskStatus::Running)
            }
        }
    }

    fn effective_trust_level(&self, request: &TaskRequest, scope: Option<&AppScope>) -> u8 {
        if let Some(level) = request.preferences.as_ref().and_then(|p| p.trust_level) {
            return level;
        }
        match scope {
            Some(scope) => self.trust.current_level(scope.app_id(), scope.user_id()),
            // Anonymous submissions have no identity to approve with.
            None => 1,
        }
    }

    fn spawn_worker(self: &Arc<Self>, request: TaskRequest, scope: Option<AppScope>) {
        let instrument = self.conductor.analyze_and_route(&request);
        let token = self.manager.register(
            &request.id,
            &request.query,
            Some(instrument),
            scope.as_ref().map(|s| s.app_id().to_string()),
            scope.as_ref().and_then(|s| s.user_id().map(str::to_string)),
        );

        let service = self.clone();
        tokio::spawn(async move {
            service.run_worker(request, scope, token).await;
        });
    }

    async fn run_worker(
        self: Arc<Self>,
        mut request: TaskRequest,
        scope: Option<AppScope>,
        token: CancellationToken,
    ) {
        let task_id = request.id.clone();

        // A cancel between submit and worker start already settled the
        // record; the update below fails with a conflict and we stop.
        if let Err(err) = self.tasks.update_status(&task_id, TaskStatus::Running).await {
            tracing::warn!(task_id = %task_id, error = %err, "worker aborted before start");
            self.manager.mark_cancelled(&task_id);
            return;
        }

        let instrument_name = self.conductor.analyze_and_route(&request);
        let max_iterations = self
            .conductor
            .instrument(&instrument_name)
            .map(|instrument| instrument.max_iterations());
        self.manager.mark_running(&task_id, max_iterations);
        self.bus.emit(TaskEvent::started(task_id.as_str()));

        // Wire runtime callbacks into the context.
        let mut context = request.context.take().unwrap_or_default();
        context.cancellation = token;
        let checkpoint_service = self.clone();
        let checkpoint_task_id = task_id.clone();
        context.checkpoint_fn = Some(Arc::new(move |record| {
            let service = checkpoint_service.clone();
            let task_id = checkpoint_task_id.clone();
            Box::pin(async move {
                let iteration_num = record.iteration_num;
                service.bus.emit(TaskEvent::iteration(task_id.as_str(), &record));
                service.manager.update_progress(&task_id, iteration_num);
                let checkpoint = record.into_checkpoint(task_id.as_str());
                if let Err(err) = service.checkpoints.record(&checkpoint).await {
                    tracing::warn!(
                        task_id = %task_id,
                        iteration = iteration_num,
                        error = %err,
                        "checkpoint persistence failed"
                    );
                }
            })
        }));
        request.context = Some(context);

        match self.conductor.execute(request).await {
            Ok(response) => {
                let outcome = response.outcome;
                if let Err(err) = self.tasks.complete(&task_id, &response).await {
                    // Lost the race against a cancel; the terminal event
                    // already went out.
                    tracing::warn!(task_id = %task_id, error = %err, "completion superseded");
                    self.manager.mark_cancelled(&task_id);
                    return;
                }
                self.bus.emit(TaskEvent::complete(
                    task_id.as_str(),
                    outcome,
                    response.summary.clone(),
                    response.confidence,
                ));
                self.manager.mark_completed(&task_id);
                if let Some(scope) = &scope {
                    self.trust
                        .record_outcome(scope.app_id(), scope.user_id(), outcome);
                }
                tracing::info!(
                    task_id = %task_id,
                    outcome = outcome.as_str(),
                    "task complete"
                );
            }
            Err(ConductorError::Cancelled) => {
                if self.tasks.cancel(&task_id).await.is_ok() {
                    self.bus.emit(TaskEvent::cancelled(task_id.as_str()));
                }
                self.manager.mark_cancelled(&task_id);
                tracing::info!(task_id = %task_id, "task cancelled");
            }
            Err(err) => {
                let detail = err.to_string();
                if self.tasks.fail(&task_id, &detail).await.is_ok() {
                    self.bus.emit(TaskEvent::error(task_id.as_str(), detail.clone()));
                }
                self.manager.mark_failed(&task_id);
                self.errors
                    .record("conductor", "internal", detail.clone(), Some(task_id.clone()));
                if let Some(scope) = &scope {
                    self.trust.record_failure(scope.app_id(), scope.user_id());
                }
                tracing::error!(task_id = %task_id, error = %detail, "task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use symphony_core::error::InstrumentError;
    use symphony_core::instrument::Instrument;
    use symphony_core::types::{
        CheckpointRecord, InstrumentResult, Outcome, ProcessType, TaskContext, TaskPreferences,
    };
    use symphony_stores::{InMemoryCheckpointStore, InMemoryTaskStore};

    /// Instrument that iterates with checkpoints until stopped.
    struct SlowLoopInstrument {
        iterations: u32,
        step_delay: Duration,
    }

    #[async_trait]
    impl Instrument for SlowLoopInstrument {
        fn name(&self) -> &str {
            "note"
        }

        fn max_iterations(&self) -> u32 {
            self.iterations
        }

        fn process_type(&self) -> ProcessType {
            ProcessType::Autonomic
        }

        fn required_capabilities(&self) -> &[&'static str] {
            &[]
        }

        async fn execute(
            &self,
            query: &str,
            context: &TaskContext,
        ) -> Result<InstrumentResult, InstrumentError> {
            for iteration in 1..=self.iterations {
                if context.is_cancelled() {
                    return Err(InstrumentError::Cancelled);
                }
                tokio::time::sleep(self.step_delay).await;
                context
                    .emit_checkpoint(CheckpointRecord::new(
                        iteration,
                        "reflection",
                        serde_json::Value::Null,
                        serde_json::json!({ "iteration": iteration }),
                        1,
                    ))
                    .await;
            }
            Ok(
                InstrumentResult::new(Outcome::Complete, format!("done: {}", query), 0.9)
                    .with_iterations(self.iterations),
            )
        }
    }

    fn service_with(iterations: u32, step_delay: Duration) -> Arc<TaskService> {
        let mut instruments: HashMap<String, Arc<dyn Instrument>> = HashMap::new();
        instruments.insert(
            "note".to_string(),
            Arc::new(SlowLoopInstrument {
                iterations,
                step_delay,
            }),
        );
        let conductor = Arc::new(Conductor::new(instruments));
        TaskServiceBuilder::new(
            conductor,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .build()
    }

    async fn wait_for_terminal(service: &Arc<TaskService>, task_id: &str) -> TaskStatus {
        for _ in 0..200 {
            let record = service.tasks().get(task_id).await.unwrap().unwrap();
            if record.status.is_terminal() {
                return record.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal status");
    }

    #[tokio::test]
    async fn test_trust_1_executes_and_persists_checkpoints() {
        let service = service_with(2, Duration::from_millis(1));
        let request = TaskRequest::new("quick question").with_preferences(TaskPreferences {
            trust_level: Some(1),
            ..TaskPreferences::default()
        });
        let task_id = request.id.clone();

        let submitted = service.submit(request, None).await.unwrap();
        assert_eq!(submitted.status, TaskStatus::Pending);
        assert!(submitted.plan.is_none());

        assert_eq!(wait_for_terminal(&service, &task_id).await, TaskStatus::Complete);

        let checkpoints = service.checkpoints().list(&task_id).await.unwrap();
        assert_eq!(checkpoints.len(), 2);

        // Terminal event is last on the topic.
        let history = service.event_bus().history(&task_id);
        assert_eq!(history.first().unwrap().event_type(), "started");
        assert_eq!(history.last().unwrap().event_type(), "complete");
        assert_eq!(
            history
                .iter()
                .filter(|event| event.is_terminal())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_trust_0_holds_plan_until_approved() {
        let service = service_with(1, Duration::from_millis(1));
        let request = TaskRequest::new("hold me").with_preferences(TaskPreferences {
            trust_level: Some(0),
            ..TaskPreferences::default()
        });
        let task_id = request.id.clone();

        let submitted = service.submit(request, None).await.unwrap();
        assert_eq!(submitted.status, TaskStatus::AwaitingApproval);
        assert!(submitted.plan.is_some());

        // Still awaiting until the explicit approve.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let record = service.tasks().get(&task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::AwaitingApproval);

        let approved = service.approve(&task_id, None).await.unwrap();
        assert_eq!(approved.status, TaskStatus::Pending);
        assert_eq!(wait_for_terminal(&service, &task_id).await, TaskStatus::Complete);

        // Double-approve is a no-op returning the current status.
        let again = service.approve(&task_id, None).await.unwrap();
        assert_eq!(again.status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_running_task_terminates_with_cancelled_event() {
        let service = service_with(50, Duration::from_millis(20));
        let request = TaskRequest::new("long job").with_preferences(TaskPreferences {
            trust_level: Some(1),
            ..TaskPreferences::default()
        });
        let task_id = request.id.clone();

        service.submit(request, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.cancel(&task_id, None).await.unwrap();

        assert_eq!(
            wait_for_terminal(&service, &task_id).await,
            TaskStatus::Cancelled
        );
        let history = service.event_bus().history(&task_id);
        assert_eq!(history.last().unwrap().event_type(), "cancelled");
    }

    #[tokio::test]
    async fn test_cancel_awaiting_approval_never_executes() {
        let service = service_with(1, Duration::from_millis(1));
        let request = TaskRequest::new("never run").with_preferences(TaskPreferences {
            trust_level: Some(0),
            ..TaskPreferences::default()
        });
        let task_id = request.id.clone();

        service.submit(request, None).await.unwrap();
        let status = service.cancel(&task_id, None).await.unwrap();
        assert_eq!(status, TaskStatus::Cancelled);

        // Approval after cancel finds no pending plan and reports the
        // terminal status.
        let response = service.approve(&task_id, None).await.unwrap();
        assert_eq!(response.status, TaskStatus::Cancelled);
        assert!(!service.approvals().is_pending(&task_id));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let service = service_with(1, Duration::from_millis(1));
        let err = service
            .submit(TaskRequest::new("   "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_trust_metrics_update_on_terminal() {
        let service = service_with(1, Duration::from_millis(1));
        let scope = AppScope::new("app-a").with_user("user-1");
        let request = TaskRequest::new("question").with_preferences(TaskPreferences {
            trust_level: Some(1),
            ..TaskPreferences::default()
        });
        let task_id = request.id.clone();

        service.submit(request, Some(scope.clone())).await.unwrap();
        wait_for_terminal(&service, &task_id).await;

        let metrics = service.trust().get_metrics("app-a", Some("user-1"));
        assert_eq!(metrics.total_tasks, 1);
        assert_eq!(metrics.successful_tasks, 1);
    }
}
