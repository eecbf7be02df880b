use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel `to` value meaning "fan out to every known recipient".
pub const BROADCAST_RECIPIENT: &str = "*";

/// Closed set of envelope kinds the bus accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssign,
    TaskComplete,
    TaskFailed,
    Escalate,
    StatusRequest,
    StatusResponse,
    ReviewRequest,
    ReviewResponse,
    ConflictEscalate,
}

/// A single inter-agent message. Immutable once sent; `id` is globally
/// unique and is the de-duplication key for at-least-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    pub to: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_RECIPIENT
    }
}
