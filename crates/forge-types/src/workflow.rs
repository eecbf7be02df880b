use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the five canonical phases a workflow passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Proposal,
    Approval,
    Development,
    QualityAssurance,
    Delivery,
}

impl Phase {
    /// Canonical forward order. Used to validate that a recorded transition
    /// either follows this order or is tagged as a rollback.
    pub const ORDER: [Phase; 5] = [
        Phase::Proposal,
        Phase::Approval,
        Phase::Development,
        Phase::QualityAssurance,
        Phase::Delivery,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).expect("exhaustive order")
    }

    /// The phase that canonically follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Proposal => "proposal",
            Phase::Approval => "approval",
            Phase::Development => "development",
            Phase::QualityAssurance => "quality_assurance",
            Phase::Delivery => "delivery",
        }
    }
}

/// Runtime status of a workflow, orthogonal to its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Terminated,
}

impl WorkflowStatus {
    /// Terminal statuses never accept further phase transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Terminated
        )
    }
}

/// One recorded phase change, including rollbacks (`reason` starts with
/// `"rollback"`) and escalation-driven re-entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// The top-level orchestration unit: one user instruction driven through the
/// five phases, persisted as `runs/<workflowId>/state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub workflow_id: String,
    pub project_id: String,
    pub instruction: String,
    pub phase: Phase,
    pub status: WorkflowStatus,
    pub phase_history: Vec<PhaseTransition>,
    pub proposal_id: Option<String>,
    pub deliverable_id: Option<String>,
    pub meeting_minutes_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(workflow_id: String, project_id: String, instruction: String) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            project_id,
            instruction,
            phase: Phase::Proposal,
            status: WorkflowStatus::Running,
            phase_history: Vec::new(),
            proposal_id: None,
            deliverable_id: None,
            meeting_minutes_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a transition and updates `phase`/`updated_at`. Does not itself
    /// validate the transition; callers (the workflow engine) check the
    /// canonical-order-or-rollback invariant before calling this.
    pub fn record_transition(&mut self, to: Phase, reason: impl Into<String>) {
        let from = self.phase;
        let timestamp = Utc::now();
        self.phase_history.push(PhaseTransition {
            from,
            to,
            timestamp,
            reason: reason.into(),
        });
        self.phase = to;
        self.updated_at = timestamp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_monotonic() {
        assert_eq!(Phase::Proposal.next(), Some(Phase::Approval));
        assert_eq!(Phase::Approval.next(), Some(Phase::Development));
        assert_eq!(Phase::Development.next(), Some(Phase::QualityAssurance));
        assert_eq!(Phase::QualityAssurance.next(), Some(Phase::Delivery));
        assert_eq!(Phase::Delivery.next(), None);
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Terminated.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::WaitingApproval.is_terminal());
    }

    #[test]
    fn record_transition_updates_phase_and_history() {
        let mut wf = Workflow::new("w1".into(), "p1".into(), "do the thing".into());
        wf.record_transition(Phase::Approval, "proposal drafted");
        assert_eq!(wf.phase, Phase::Approval);
        assert_eq!(wf.phase_history.len(), 1);
        assert_eq!(wf.phase_history[0].from, Phase::Proposal);
    }
}
