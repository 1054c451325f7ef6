//! Serialized workflow state captured at a suspension point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to re-enter a suspended workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub thread_id: String,
    pub workflow: String,
    pub version: u32,
    /// Node that issued the suspension.
    pub node: String,
    pub prompt: String,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
