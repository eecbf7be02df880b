use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgendaStatus {
    Pending,
    Discussing,
    Concluded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub id: String,
    pub topic: String,
    pub description: String,
    pub status: AgendaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub agent_id: String,
    pub role: String,
    pub worker_type: String,
    pub expertise: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub participant_id: String,
    pub participant_role: String,
    pub content: String,
    pub agenda_item_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Full minutes of a facilitated meeting. A round-trip save-then-load must
/// yield a field-by-field deep-equal value (§8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingMinutes {
    pub meeting_id: String,
    pub workflow_id: String,
    pub facilitator: String,
    pub agenda: Vec<AgendaItem>,
    pub participants: Vec<Participant>,
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}
