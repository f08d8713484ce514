//! Cron-driven heartbeat scheduler.
//!
//! Single-node, tick-based: each tick walks the active heartbeats and,
//! for those whose cron expression matches the current minute in their
//! timezone, materializes a trust-level-1 task through the service. A
//! HeartbeatRun keyed by (heartbeat, fire minute) suppresses duplicate
//! fires within the same cron minute. Completion updates the run and
//! fires the optional webhook (fire-and-forget, bounded timeout).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use croner::Cron;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::interval;

use symphony_core::store::{AppScope, HeartbeatStore};
use symphony_core::types::{
    Heartbeat, HeartbeatRun, HeartbeatRunStatus, TaskContext, TaskPreferences, TaskRequest,
};

use crate::event_bus::TaskEvent;
use crate::service::TaskService;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on waiting for a materialized task to terminate.
const RUN_WATCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Materializes due heartbeats into tasks.
pub struct HeartbeatScheduler {
    heartbeats: Arc<dyn HeartbeatStore>,
    service: Arc<TaskService>,
    http: reqwest::Client,
    tick_interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(heartbeats: Arc<dyn HeartbeatStore>, service: Arc<TaskService>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            heartbeats,
            service,
            http,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_secs(1));
        self
    }

    /// Validate a cron expression without scheduling anything.
    pub fn validate_cron(expression: &str) -> Result<(), String> {
        Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    /// Spawn the background tick loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                interval_s = scheduler.tick_interval.as_secs(),
                "heartbeat scheduler started"
            );
            let mut tick = interval(scheduler.tick_interval);
            loop {
                tick.tick().await;
                scheduler.tick_at(Utc::now()).await;
            }
        })
    }

    /// Run one tick now (also the `/heartbeats/tick` force path).
    pub async fn tick_now(&self) -> usize {
        self.tick_at(Utc::now()).await
    }

    /// Walk active heartbeats against a reference instant; returns the
    /// number of runs fired.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> usize {
        let heartbeats = match self.heartbeats.list_active().await {
            Ok(heartbeats) => heartbeats,
            Err(err) => {
                tracing::error!(error = %err, "failed to list active heartbeats");
                return 0;
            }
        };

        let mut fired = 0;
        for heartbeat in heartbeats {
            match self.try_fire(&heartbeat, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(
                        heartbeat_id = %heartbeat.id,
                        error = %err,
                        "heartbeat materialization failed"
                    );
                }
            }
        }
        fired
    }

    async fn try_fire(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<bool, String> {
        let timezone = Tz::from_str(&heartbeat.timezone).unwrap_or(chrono_tz::UTC);
        let local = now.with_timezone(&timezone);
        // Match against the start of the minute so a tick landing
        // anywhere inside the cron minute counts as due.
        let minute_start = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local);

        let cron = Cron::new(&heartbeat.cron_expression)
            .with_seconds_optional()
            .parse()
            .map_err(|err| format!("invalid cron '{}': {}", heartbeat.cron_expression, err))?;
        let due = cron
            .is_time_matching(&minute_start)
            .map_err(|err| format!("cron evaluation failed: {}", err))?;
        if !due {
            return Ok(false);
        }

        // Duplicate-fire protection: one run per heartbeat per cron
        // minute.
        let fire_minute = local.format("%Y-%m-%dT%H:%M").to_string();
        if self
            .heartbeats
            .find_run_for_minute(&heartbeat.id, &fire_minute)
            .await
            .map_err(|err| err.to_string())?
            .is_some()
        {
            tracing::debug!(
                heartbeat_id = %heartbeat.id,
                fire_minute = %fire_minute,
                "duplicate fire suppressed"
            );
            return Ok(false);
        }

        let mut run = HeartbeatRun::new(heartbeat.id.as_str(), fire_minute.as_str());
        self.heartbeats
            .create_run(&run)
            .await
            .map_err(|err| err.to_string())?;

        let query = expand_template(&heartbeat.query_template, heartbeat, &local);
        let mut context = heartbeat
            .context_template
            .as_ref()
            .and_then(|template| serde_json::from_value::<TaskContext>(template.clone()).ok())
            .unwrap_or_default();
        context.app_id = heartbeat.app_id.clone();
        context.user_id = heartbeat.user_id.clone();

        // Heartbeat tasks run at trust level 1: no approval gate.
        let request = TaskRequest::new(query)
            .with_context(context)
            .with_preferences(TaskPreferences {
                trust_level: Some(1),
                notify_on_complete: false,
                ..TaskPreferences::default()
            });
        let task_id = request.id.clone();

        let scope = heartbeat.app_id.as_ref().map(|app_id| {
            let scope = AppScope::new(app_id.as_str());
            match &heartbeat.user_id {
                Some(user_id) => scope.with_user(user_id.as_str()),
                None => scope,
            }
        });

        // Subscribe before submit so the watcher cannot miss the
        // terminal event.
        let events = self.service.event_bus().subscribe(&task_id);

        self.service
            .submit(request, scope)
            .await
            .map_err(|err| err.to_string())?;

        run.task_id = Some(task_id.clone());
        run.status = HeartbeatRunStatus::Running;
        self.heartbeats
            .update_run(&run)
            .await
            .map_err(|err| err.to_string())?;

        tracing::info!(
            heartbeat_id = %heartbeat.id,
            task_id = %task_id,
            fire_minute = %fire_minute,
            "heartbeat fired"
        );

        self.watch_run(heartbeat.clone(), run, events);
        Ok(true)
    }

    /// Wait for the task's terminal event, then settle the run and call
    /// the webhook.
    fn watch_run(
        &self,
        heartbeat: Heartbeat,
        mut run: HeartbeatRun,
        mut events: tokio::sync::mpsc::Receiver<TaskEvent>,
    ) {
        let heartbeats = self.heartbeats.clone();
        let service = self.service.clone();
        let http = self.http.clone();

        tokio::spawn(async move {
            let terminal = tokio::time::timeout(RUN_WATCH_TIMEOUT, async {
                while let Some(event) = events.recv().await {
                    if event.is_terminal() {
                        return Some(event);
                    }
                }
                None
            })
            .await
            .ok()
            .flatten();

            run.completed_at = Some(Utc::now());
            match &terminal {
                Some(TaskEvent::Complete { outcome, .. }) => {
                    run.status = HeartbeatRunStatus::Completed;
                    run.outcome = Some(outcome.as_str().to_string());
                }
                Some(TaskEvent::Error { error, .. }) => {
                    run.status = HeartbeatRunStatus::Failed;
                    run.error = Some(error.clone());
                }
                Some(TaskEvent::Cancelled { .. }) => {
                    run.status = HeartbeatRunStatus::Failed;
                    run.error = Some("task cancelled".to_string());
                }
                _ => {
                    run.status = HeartbeatRunStatus::Failed;
                    run.error = Some("timed out waiting for terminal event".to_string());
                }
            }
            if let Err(err) = heartbeats.update_run(&run).await {
                tracing::warn!(run_id = %run.id, error = %err, "run settlement failed");
            }

            if let (Some(webhook_url), Some(task_id)) = (&heartbeat.webhook_url, &run.task_id) {
                let response = service
                    .tasks()
                    .get(task_id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|record| record.response);
                let payload = json!({
                    "event": "heartbeat.completed",
                    "heartbeat_id": heartbeat.id,
                    "heartbeat_name": heartbeat.name,
                    "run_id": run.id,
                    "task_id": task_id,
                    "status": run.status,
                    "outcome": run.outcome,
                    "response": response,
                    "timestamp": Utc::now(),
                });
                // Fire-and-forget with the client-level timeout.
                match http.post(webhook_url).json(&payload).send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::info!(
                            heartbeat_id = %heartbeat.id,
                            status = response.status().as_u16(),
                            "webhook delivered"
                        );
                    }
                    Ok(response) => {
                        service.errors().record(
                            "webhook",
                            "http",
                            format!("status {}", response.status()),
                            run.task_id.clone(),
                        );
                    }
                    Err(err) => {
                        service.errors().record(
                            "webhook",
                            if err.is_timeout() { "timeout" } else { "http" },
                            err.to_string(),
                            run.task_id.clone(),
                        );
                    }
                }
            }
        });
    }
}

/// Expand `{date}`, `{datetime}`, `{time}`, `{weekday}`, `{user_name}`
/// and `{heartbeat_name}` placeholders.
fn expand_template(template: &str, heartbeat: &Heartbeat, local: &DateTime<Tz>) -> String {
    template
        .replace("{date}", &local.format("%Y-%m-%d").to_string())
        .replace("{datetime}", &local.to_rfc3339())
        .replace("{time}", &local.format("%H:%M").to_string())
        .replace("{weekday}", &local.format("%A").to_string())
        .replace(
            "{user_name}",
            heartbeat.user_id.as_deref().unwrap_or("there"),
        )
        .replace("{heartbeat_name}", &heartbeat.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use symphony_core::error::InstrumentError;
    use symphony_core::instrument::Instrument;
    use symphony_core::types::{InstrumentResult, Outcome, ProcessType};
    use symphony_stores::{InMemoryCheckpointStore, InMemoryHeartbeatStore, InMemoryTaskStore};

    use crate::conductor::Conductor;
    use crate::service::TaskServiceBuilder;

    struct InstantInstrument;

    #[async_trait]
    impl Instrument for InstantInstrument {
        fn name(&self) -> &str {
            "note"
        }

        fn max_iterations(&self) -> u32 {
            1
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
            _context: &TaskContext,
        ) -> Result<InstrumentResult, InstrumentError> {
            Ok(
                InstrumentResult::new(Outcome::Complete, format!("done: {}", query), 0.9)
                    .with_iterations(1),
            )
        }
    }

    fn scheduler_fixture() -> (Arc<HeartbeatScheduler>, Arc<InMemoryHeartbeatStore>) {
        let mut instruments: HashMap<String, Arc<dyn Instrument>> = HashMap::new();
        instruments.insert("note".to_string(), Arc::new(InstantInstrument));
        let service = TaskServiceBuilder::new(
            Arc::new(Conductor::new(instruments)),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .build();

        let store = Arc::new(InMemoryHeartbeatStore::new());
        let scheduler = Arc::new(HeartbeatScheduler::new(store.clone(), service));
        (scheduler, store)
    }

    fn daily_nine_am(id: &str) -> Heartbeat {
        Heartbeat {
            id: id.to_string(),
            app_id: None,
            user_id: Some("morning-user".to_string()),
            name: "morning briefing".to_string(),
            query_template: "Briefing for {user_name} on {weekday} {date}".to_string(),
            cron_expression: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
            context_template: None,
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fires_on_matching_minute_only() {
        let (scheduler, store) = scheduler_fixture();
        store.upsert(&daily_nine_am("h1")).await.unwrap();

        let off_schedule = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        assert_eq!(scheduler.tick_at(off_schedule).await, 0);

        let on_schedule = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        assert_eq!(scheduler.tick_at(on_schedule).await, 1);

        let runs = store.list_runs("h1", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].task_id.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_fire_within_minute_is_suppressed() {
        let (scheduler, store) = scheduler_fixture();
        store.upsert(&daily_nine_am("h1")).await.unwrap();

        let first = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 5).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 45).unwrap();
        assert_eq!(scheduler.tick_at(first).await, 1);
        assert_eq!(scheduler.tick_at(second).await, 0);

        assert_eq!(store.list_runs("h1", 10).await.unwrap().len(), 1);

        // The next day is a fresh cron minute.
        let next_day = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        assert_eq!(scheduler.tick_at(next_day).await, 1);
    }

    #[tokio::test]
    async fn test_inactive_heartbeats_never_fire() {
        let (scheduler, store) = scheduler_fixture();
        let mut heartbeat = daily_nine_am("h1");
        heartbeat.is_active = false;
        store.upsert(&heartbeat).await.unwrap();

        let on_schedule = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        assert_eq!(scheduler.tick_at(on_schedule).await, 0);
    }

    #[tokio::test]
    async fn test_timezone_shifts_the_matching_minute() {
        let (scheduler, store) = scheduler_fixture();
        let mut heartbeat = daily_nine_am("h1");
        heartbeat.timezone = "America/Los_Angeles".to_string();
        store.upsert(&heartbeat).await.unwrap();

        // 09:00 UTC is 01:00 or 02:00 in Los Angeles; not due.
        let utc_morning = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        assert_eq!(scheduler.tick_at(utc_morning).await, 0);

        // 16:00 UTC on 2026-08-02 is 09:00 PDT.
        let la_morning = Utc.with_ymd_and_hms(2026, 8, 2, 16, 0, 0).unwrap();
        assert_eq!(scheduler.tick_at(la_morning).await, 1);
    }

    #[test]
    fn test_template_expansion() {
        let heartbeat = daily_nine_am("h1");
        let local = chrono_tz::UTC
            .with_ymd_and_hms(2026, 8, 2, 9, 0, 0)
            .unwrap();
        let expanded = expand_template(&heartbeat.query_template, &heartbeat, &local);
        assert_eq!(expanded, "Briefing for morning-user on Sunday 2026-08-02");
    }
}
