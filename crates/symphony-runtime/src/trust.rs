//! Trust escalation tracking per (app, user).

use std::collections::HashMap;
use std::sync::Mutex;

use symphony_core::types::{Outcome, TrustMetrics, TrustSuggestion};

type TrustKey = (String, Option<String>);

/// Tracks success metrics and upgrade suggestions.
///
/// Updates for one key are serialized behind the tracker mutex so
/// concurrent terminal transitions cannot lose counts. The trust level
/// itself only changes through `set_level` (the user-initiated path).
#[derive(Default)]
pub struct TrustTracker {
    metrics: Mutex<HashMap<TrustKey, TrustMetrics>>,
}

impl TrustTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TrustKey, TrustMetrics>> {
        match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn key(app_id: &str, user_id: Option<&str>) -> TrustKey {
        (app_id.to_string(), user_id.map(str::to_string))
    }

    /// Current metrics, creating a zeroed record on first use.
    pub fn get_metrics(&self, app_id: &str, user_id: Option<&str>) -> TrustMetrics {
        let mut metrics = self.lock();
        metrics
            .entry(Self::key(app_id, user_id))
            .or_insert_with(|| TrustMetrics::new(app_id, user_id.map(str::to_string)))
            .clone()
    }

    pub fn current_level(&self, app_id: &str, user_id: Option<&str>) -> u8 {
        self.get_metrics(app_id, user_id).current_trust_level
    }

    /// Record a terminal outcome.
    pub fn record_outcome(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        outcome: Outcome,
    ) -> TrustMetrics {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(Self::key(app_id, user_id))
            .or_insert_with(|| TrustMetrics::new(app_id, user_id.map(str::to_string)));
        entry.record_outcome(outcome);
        entry.clone()
    }

    /// Record a task that errored before reaching an outcome.
    pub fn record_failure(&self, app_id: &str, user_id: Option<&str>) -> TrustMetrics {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(Self::key(app_id, user_id))
            .or_insert_with(|| TrustMetrics::new(app_id, user_id.map(str::to_string)));
        entry.record_failure();
        entry.clone()
    }

    /// Upgrade suggestion, if the track record warrants one.
    pub fn suggestion(&self, app_id: &str, user_id: Option<&str>) -> Option<TrustSuggestion> {
        let metrics = self.get_metrics(app_id, user_id);
        let suggested = metrics.suggested_trust_level()?;

        let reason = if suggested == 1 {
            format!(
                "{} consecutive successful tasks with a {:.0}% overall success rate. \
                 Consider enabling auto-execution.",
                metrics.consecutive_successes,
                metrics.success_rate() * 100.0
            )
        } else {
            format!(
                "Excellent track record: {} consecutive successes at {:.0}% success rate. \
                 Minimal-surface auto-execution is available.",
                metrics.consecutive_successes,
                metrics.success_rate() * 100.0
            )
        };

        Some(TrustSuggestion {
            current_level: metrics.current_trust_level,
            suggested_level: suggested,
            reason,
            metrics,
        })
    }

    /// User-initiated trust level change; the only mutation path.
    pub fn set_level(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        trust_level: u8,
    ) -> Result<TrustMetrics, String> {
        if trust_level > 2 {
            return Err("trust_level must be 0, 1 or 2".to_string());
        }
        let mut metrics = self.lock();
        let entry = metrics
            .entry(Self::key(app_id, user_id))
            .or_insert_with(|| TrustMetrics::new(app_id, user_id.map(str::to_string)));
        entry.current_trust_level = trust_level;
        entry.updated_at = chrono::Utc::now();
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_never_changes_from_outcomes() {
        let tracker = TrustTracker::new();
        for _ in 0..20 {
            tracker.record_outcome("app", Some("user"), Outcome::Complete);
        }
        // A perfect streak suggests an upgrade but never applies it.
        let metrics = tracker.get_metrics("app", Some("user"));
        assert_eq!(metrics.current_trust_level, 0);
        assert!(tracker.suggestion("app", Some("user")).is_some());
    }

    #[test]
    fn test_set_level_validates_and_applies() {
        let tracker = TrustTracker::new();
        assert!(tracker.set_level("app", None, 3).is_err());

        let metrics = tracker.set_level("app", None, 2).unwrap();
        assert_eq!(metrics.current_trust_level, 2);
        assert_eq!(tracker.current_level("app", None), 2);
    }

    #[test]
    fn test_keys_are_per_user_within_app() {
        let tracker = TrustTracker::new();
        tracker.record_outcome("app", Some("u1"), Outcome::Complete);
        tracker.record_outcome("app", Some("u2"), Outcome::Bounded);

        assert_eq!(tracker.get_metrics("app", Some("u1")).successful_tasks, 1);
        assert_eq!(tracker.get_metrics("app", Some("u2")).failed_tasks, 1);
        assert_eq!(tracker.get_metrics("app", None).total_tasks, 0);
    }
}
