use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker role a `ChildTicket` is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Research,
    Design,
    Designer,
    Developer,
    Test,
    Reviewer,
}

/// Status shared by parent, child and grandchild tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Decomposing,
    InProgress,
    ReviewRequested,
    RevisionRequired,
    Completed,
    Failed,
    /// Non-terminal annotation on the way to `Completed`: a PR exists for
    /// this unit of work but hasn't merged. Rollup logic (parent-completion
    /// checks, `listWorkflows` filters) treats this the same as `Completed`.
    PrCreated,
}

impl TicketStatus {
    /// Counts as "done" for parent/rollup purposes: both `Completed` and the
    /// `PrCreated` annotation satisfy a parent's completion invariant.
    pub fn counts_as_done(self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::PrCreated)
    }

    /// The allowed `to` statuses for `updateStatus`, per the transition table.
    pub fn allowed_transitions(self) -> &'static [TicketStatus] {
        use TicketStatus::*;
        match self {
            Pending => &[Decomposing, InProgress, Failed],
            Decomposing => &[InProgress, Failed],
            InProgress => &[ReviewRequested, Completed, Failed],
            ReviewRequested => &[RevisionRequired, Completed, Failed],
            RevisionRequired => &[InProgress, Failed],
            Completed => &[PrCreated],
            PrCreated => &[Completed],
            Failed => &[],
        }
    }

    pub fn can_transition_to(self, to: TicketStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentTicket {
    pub id: String,
    pub project_id: String,
    pub instruction: String,
    pub meta: TicketMeta,
    pub status: TicketStatus,
    pub children: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTicket {
    pub id: String,
    pub parent_id: String,
    pub worker_type: WorkerType,
    pub description: String,
    pub status: TicketStatus,
    pub grandchildren: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandchildTicket {
    pub id: String,
    pub child_id: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
