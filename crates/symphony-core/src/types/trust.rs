//! Per-(app, user) trust metrics and upgrade suggestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::Outcome;

/// Success metrics for one (app, user) pair.
///
/// `current_trust_level` never increases automatically; only the
/// user-initiated trust-level update mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustMetrics {
    pub app_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub consecutive_successes: u32,
    pub current_trust_level: u8,
    #[serde(default)]
    pub last_task_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TrustMetrics {
    pub fn new(app_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            consecutive_successes: 0,
            current_trust_level: 0,
            last_task_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Record one terminal outcome. Success = complete | saturated.
    pub fn record_outcome(&mut self, outcome: Outcome) {
        self.total_tasks += 1;
        if outcome.is_success() {
            self.successful_tasks += 1;
            self.consecutive_successes += 1;
        } else {
            self.failed_tasks += 1;
            self.consecutive_successes = 0;
        }
        let now = Utc::now();
        self.last_task_at = Some(now);
        self.updated_at = now;
    }

    /// Record a task that errored out before producing an outcome.
    pub fn record_failure(&mut self) {
        self.total_tasks += 1;
        self.failed_tasks += 1;
        self.consecutive_successes = 0;
        let now = Utc::now();
        self.last_task_at = Some(now);
        self.updated_at = now;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.successful_tasks as f64 / self.total_tasks as f64
    }

    /// Level the metrics would justify, if higher than the current one.
    ///
    /// 0 -> 1 at 5 consecutive successes and >= 80% success rate;
    /// 1 -> 2 at 10 consecutive successes and >= 90% success rate.
    pub fn suggested_trust_level(&self) -> Option<u8> {
        match self.current_trust_level {
            0 if self.consecutive_successes >= 5 && self.success_rate() >= 0.80 => Some(1),
            1 if self.consecutive_successes >= 10 && self.success_rate() >= 0.90 => Some(2),
            _ => None,
        }
    }
}

/// Suggestion returned by `GET /trust/suggestion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSuggestion {
    pub current_level: u8,
    pub suggested_level: u8,
    pub reason: String,
    pub metrics: TrustMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_resets_on_failure() {
        let mut metrics = TrustMetrics::new("app", None);
        metrics.record_outcome(Outcome::Complete);
        metrics.record_outcome(Outcome::Saturated);
        assert_eq!(metrics.consecutive_successes, 2);

        metrics.record_outcome(Outcome::Bounded);
        assert_eq!(metrics.consecutive_successes, 0);
        assert_eq!(metrics.failed_tasks, 1);
    }

    #[test]
    fn test_upgrade_thresholds() {
        let mut metrics = TrustMetrics::new("app", None);
        for _ in 0..4 {
            metrics.record_outcome(Outcome::Complete);
        }
        assert_eq!(metrics.suggested_trust_level(), None);

        metrics.record_outcome(Outcome::Complete);
        assert_eq!(metrics.suggested_trust_level(), Some(1));

        // Suggestion targets the next level only.
        metrics.current_trust_level = 1;
        for _ in 0..5 {
            metrics.record_outcome(Outcome::Complete);
        }
        assert_eq!(metrics.suggested_trust_level(), Some(2));
    }

    #[test]
    fn test_low_success_rate_blocks_upgrade() {
        let mut metrics = TrustMetrics::new("app", None);
        for _ in 0..6 {
            metrics.record_outcome(Outcome::Bounded);
        }
        for _ in 0..5 {
            metrics.record_outcome(Outcome::Complete);
        }
        // 5 consecutive successes but under the 80% rate bar.
        assert_eq!(metrics.consecutive_successes, 5);
        assert_eq!(metrics.suggested_trust_level(), None);
    }
}
