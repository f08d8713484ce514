//! Error-learning store.
//!
//! Classified failures (tool calls, delegation, workers) are recorded
//! with simple per-(tool, kind) pattern counts for the health surface.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_MAX_RECORDS: usize = 1_000;

/// One classified failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub source: String,
    pub kind: String,
    pub message: String,
    pub task_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregated failure pattern.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPattern {
    pub source: String,
    pub kind: String,
    pub count: u64,
}

/// Bounded in-memory error journal with pattern counts.
pub struct ErrorTracker {
    records: Mutex<VecDeque<ErrorRecord>>,
    patterns: Mutex<BTreeMap<(String, String), u64>>,
    max_records: usize,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            patterns: Mutex::new(BTreeMap::new()),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    pub fn record(
        &self,
        source: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
        task_id: Option<String>,
    ) {
        let record = ErrorRecord {
            source: source.into(),
            kind: kind.into(),
            message: message.into(),
            task_id,
            occurred_at: Utc::now(),
        };

        {
            let mut patterns = match self.patterns.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *patterns
                .entry((record.source.clone(), record.kind.clone()))
                .or_insert(0) += 1;
        }

        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn patterns(&self) -> Vec<ErrorPattern> {
        let patterns = match self.patterns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        patterns
            .iter()
            .map(|((source, kind), count)| ErrorPattern {
                source: source.clone(),
                kind: kind.clone(),
                count: *count,
            })
            .collect()
    }
}
