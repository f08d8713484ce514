//! Persisted composition specifications (arrangements).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentConfig;

/// One step of a sequential composition spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialStepSpec {
    pub instrument: String,
    #[serde(default)]
    pub config: Option<InstrumentConfig>,
}

/// One branch of a cross-room composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomBranch {
    pub room_id: String,
    pub sub_query: String,
}

/// Declarative composition shape; instantiated by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompositionSpec {
    Sequential {
        steps: Vec<SequentialStepSpec>,
    },
    Parallel {
        branches: Vec<String>,
        #[serde(default)]
        merge_instrument: Option<String>,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    CrossRoom {
        branches: Vec<RoomBranch>,
    },
}

/// A reusable, persisted arrangement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedArrangement {
    pub id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub spec: CompositionSpec,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
