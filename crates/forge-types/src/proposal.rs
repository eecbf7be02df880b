use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub severity: RiskSeverity,
    pub description: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBreakdownItem {
    pub task_number: u32,
    pub title: String,
    pub worker_type: String,
    pub estimated_effort: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAssignment {
    pub task_number: u32,
    pub agent_id: String,
    pub worker_type: String,
}

/// The artifact produced in the proposal phase, derived deterministically
/// from a `MeetingMinutes` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub workflow_id: String,
    pub summary: String,
    pub scope: String,
    pub task_breakdown: Vec<TaskBreakdownItem>,
    pub worker_assignments: Vec<WorkerAssignment>,
    pub risks: Vec<Risk>,
    pub meeting_id: String,
    pub version: u32,
}
