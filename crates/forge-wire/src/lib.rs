//! Wire-format request/response models for the `OrchestratorAPI` HTTP
//! surface: response DTOs carry a `Wire`-prefixed name distinct from the
//! internal domain types in `forge-types`, so the wire shape can evolve
//! independently of storage layout. Every operation responds inside the
//! uniform envelope `{success, data?, error?, code?}`.

use chrono::{DateTime, Utc};
use forge_types::{Phase, TicketStatus, WorkerType, WorkflowStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The uniform response envelope every OrchestratorAPI operation returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub ack: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { ack: true }
    }
}

// --- submitTask / getTaskStatus / cancelTask -------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    pub instruction: String,
    pub project_id: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskStatus {
    pub task_id: String,
    pub status: TicketStatus,
    pub workflow_id: Option<String>,
}

// --- startWorkflow / listWorkflows / getWorkflow ---------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    pub instruction: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkflowsQuery {
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireWorkflowSummary {
    pub workflow_id: String,
    pub project_id: String,
    pub phase: Phase,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- approveWorkflow / escalateWorkflow / rollbackWorkflow -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    RequestRevision,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveWorkflowRequest {
    pub action: ApprovalAction,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Retry,
    Skip,
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateWorkflowRequest {
    pub action: EscalationAction,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackWorkflowRequest {
    pub target_phase: Phase,
}

// --- getProgress ------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskProgressItem {
    pub task_id: String,
    pub title: String,
    pub status: SubtaskStatus,
    pub worker_type: WorkerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Working,
    Review,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProgress {
    pub workflow_id: String,
    pub tasks: Vec<SubtaskProgressItem>,
    pub completion_rate: f64,
}

// --- config -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigPatchRequest {
    #[serde(flatten)]
    pub patch: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValidationResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// --- health ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub build_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiHealthResponse {
    pub available: bool,
    pub local_llm_available: bool,
    pub coding_agent_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_hint: Option<String>,
}
