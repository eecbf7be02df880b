use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PausedProgress {
    pub completed_sub_tasks: u32,
    pub total_sub_tasks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_sub_task_id: Option<String>,
}

/// Snapshot written when AI unavailability is detected mid-run. A save-then-
/// load round trip must be exactly deep-equal (§8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PausedState {
    pub run_id: String,
    pub paused_at: DateTime<Utc>,
    pub task_status: String,
    pub progress: PausedProgress,
    pub reason: String,
    pub recovery_instructions: String,
}
