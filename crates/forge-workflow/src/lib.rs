//! The phase state machine: one `WorkflowEngine` composes approvals, the
//! message bus, tickets, quality gates and meetings into the five-phase
//! lifecycle (proposal → approval → development → quality assurance →
//! delivery), owning every collaborator and driving one tokio task per run.
//!
//! Each workflow is driven by exactly one `drive` task at a time. It loops
//! reading the persisted phase and dispatching to that phase's handler;
//! handlers that need a human decision call `ApprovalGate::request_approval`
//! and suspend. A decision arriving through `submit_approval` either wakes
//! that live task (`hadResolver=true`, the common case) or — if the process
//! restarted between suspend and decision — applies itself directly and
//! spawns a fresh `drive` task to resume the loop (`hadResolver=false`).
//! Exactly one of those two paths ever applies a given decision.

mod delivery;
mod development;
mod failure_report;
mod proposal;
mod qa;

pub use forge_approval::DecisionAction;

pub use delivery::build_deliverable;
pub use development::{manager_recipient, DevelopmentState, TaskProgress};
pub use failure_report::{render_failure_report, FailureEntry};
pub use proposal::build_proposal;
pub use qa::QaOutcome;

use chrono::Utc;
use forge_approval::{ApprovalGate, Decision};
use forge_bus::AgentBus;
use forge_meeting::MeetingCoordinator;
use forge_quality::{DecisionRecommendation, QualityGate, QualityGateConfig, QualityGateReporter, QualityGateResult};
use forge_retry::{classify_error, recommended_action, EscalationPayload, EscalationSink, RetryPolicy};
use forge_store::PersistentStore;
use forge_tickets::TicketStore;
use forge_types::{
    Deliverable, MeetingMinutes, OrchestratorError, Phase, Proposal, Result, TicketMeta, TicketStatus, Workflow,
    WorkflowStatus,
};
use forge_wire::WireProgress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct WorkflowIndex {
    ids: Vec<String>,
}

pub struct WorkflowEngine {
    store: Arc<PersistentStore>,
    bus: Arc<AgentBus>,
    approvals: Arc<ApprovalGate>,
    tickets: Arc<TicketStore>,
    quality: Arc<QualityGate>,
    reporter: QualityGateReporter,
    meetings: Arc<MeetingCoordinator>,
    retry_policy: RetryPolicy,
    escalation_sink: Arc<dyn EscalationSink>,
    qa_config: QualityGateConfig,
    workspace_root: PathBuf,
    /// Per-workflow QA failure counter. Deliberately in-memory only: a
    /// restart resets a workflow's count back to zero, trading a little
    /// escalation precision for not needing a dedicated persisted counter
    /// document (the same information is visible in `runs/<id>/quality.json`
    /// history for a human reviewing the case).
    qa_failures: Mutex<HashMap<String, u32>>,
    poll_timeout: Duration,
    poll_idle_limit: u32,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PersistentStore>,
        bus: Arc<AgentBus>,
        approvals: Arc<ApprovalGate>,
        tickets: Arc<TicketStore>,
        quality: Arc<QualityGate>,
        meetings: Arc<MeetingCoordinator>,
        retry_policy: RetryPolicy,
        escalation_sink: Arc<dyn EscalationSink>,
        qa_config: QualityGateConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            store,
            bus,
            approvals,
            tickets,
            quality,
            reporter: QualityGateReporter::new(),
            meetings,
            retry_policy,
            escalation_sink,
            qa_config,
            workspace_root,
            qa_failures: Mutex::new(HashMap::new()),
            poll_timeout: Duration::from_secs(30),
            poll_idle_limit: 10,
        }
    }

    // --- creation and lookup ------------------------------------------------

    /// Creates the parent ticket, convenes the kickoff meeting, drafts the
    /// first proposal, and transitions into `approval` — then spawns the
    /// `drive` task that suspends waiting for the human decision. Returns as
    /// soon as the synchronous setup is persisted, so callers see a stable
    /// `waiting_approval` workflow immediately.
    pub async fn start_workflow(self: &Arc<Self>, project_id: &str, instruction: &str) -> Result<String> {
        self.start_workflow_with_meta(project_id, instruction, TicketMeta::default()).await
    }

    /// Same as `start_workflow` but threads `TicketMeta` (priority/tags/
    /// deadline) through to the parent ticket. Used by `submitTask` (§6),
    /// which accepts this metadata on admission; `startWorkflow` itself
    /// never carries it, so it delegates here with the default.
    pub async fn start_workflow_with_meta(self: &Arc<Self>, project_id: &str, instruction: &str, meta: TicketMeta) -> Result<String> {
        let parent = self.tickets.create_parent(project_id, instruction, meta).await?;
        let workflow_id = parent.id.clone();
        let mut workflow = Workflow::new(workflow_id.clone(), project_id.to_string(), instruction.to_string());

        let meeting = self.meetings.convene(&workflow_id, instruction, "coo_pm").await?;
        workflow.meeting_minutes_ids.push(meeting.meeting_id.clone());

        let proposal = build_proposal(&workflow_id, &meeting, 1);
        self.store.save("runs", &format!("{workflow_id}/proposal"), &proposal).await?;
        workflow.proposal_id = Some(proposal.id.clone());

        workflow.record_transition(Phase::Approval, "proposal drafted");
        workflow.status = WorkflowStatus::WaitingApproval;
        self.persist_workflow(&workflow).await?;
        self.append_workflow_index(&workflow_id).await?;
        self.bus.register_recipient(&manager_recipient(&workflow_id)).await;

        self.spawn_drive(workflow_id.clone());
        Ok(workflow_id)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        self.load_workflow(workflow_id).await
    }

    pub async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>> {
        let index: WorkflowIndex = self.store.load("workflows", "_index").await?.unwrap_or_default();
        let mut out = Vec::new();
        for id in index.ids {
            if let Ok(workflow) = self.load_workflow(&id).await {
                if status.map(|s| s == workflow.status).unwrap_or(true) {
                    out.push(workflow);
                }
            }
        }
        Ok(out)
    }

    pub async fn get_progress(&self, workflow_id: &str) -> Result<Option<WireProgress>> {
        Ok(development::load(&self.store, workflow_id).await?.map(|s| s.to_wire()))
    }

    pub async fn get_proposal(&self, workflow_id: &str) -> Result<Option<Proposal>> {
        self.store.load("runs", &format!("{workflow_id}/proposal")).await
    }

    pub async fn get_deliverable(&self, workflow_id: &str) -> Result<Option<Deliverable>> {
        self.store.load("runs", &format!("{workflow_id}/deliverable")).await
    }

    pub async fn get_quality(&self, workflow_id: &str) -> Result<Option<QualityGateResult>> {
        self.quality.load(workflow_id).await
    }

    pub async fn get_meetings(&self, workflow_id: &str) -> Result<Vec<MeetingMinutes>> {
        let workflow = self.load_workflow(workflow_id).await?;
        let mut out = Vec::with_capacity(workflow.meeting_minutes_ids.len());
        for meeting_id in &workflow.meeting_minutes_ids {
            if let Some(minutes) = self.meetings.get(workflow_id, meeting_id).await? {
                out.push(minutes);
            }
        }
        Ok(out)
    }

    /// Replays every non-terminal workflow on process startup by spawning a
    /// fresh `drive` task for it. A task suspended in `request_approval`
    /// simply waits again; one that had already received an un-consumed
    /// decision is covered by `submit_approval`'s `hadResolver=false` path,
    /// not by this method.
    pub async fn on_restart(self: &Arc<Self>) -> Result<usize> {
        let workflows = self.list_workflows(None).await?;
        let mut resumed = 0;
        for workflow in workflows {
            if !workflow.status.is_terminal() {
                self.spawn_drive(workflow.workflow_id);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Cancels a running workflow (§5: `cancelTask` propagates to the owning
    /// workflow): cancels any outstanding approval rendezvous, leaves already
    /// completed sub-tasks recorded, and moves the workflow to `terminated`.
    /// A no-op on a workflow already in a terminal status.
    pub async fn cancel_task(&self, workflow_id: &str) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.status.is_terminal() {
            return Ok(());
        }
        self.approvals.cancel_approval(workflow_id, "task cancelled").await?;
        workflow.status = WorkflowStatus::Terminated;
        workflow.updated_at = Utc::now();
        self.persist_workflow(&workflow).await
    }

    /// Drains every non-terminal workflow to `terminated` and cancels every
    /// outstanding approval rendezvous (§5 emergency-stop). Returns the
    /// number of workflows drained. New admissions are rejected by the
    /// caller (the OrchestratorAPI tracks the paused/stopped flag, not this
    /// engine) until a future `resume`.
    pub async fn emergency_stop(&self) -> Result<usize> {
        let workflows = self.list_workflows(None).await?;
        let mut drained = 0;
        for mut workflow in workflows {
            if workflow.status.is_terminal() {
                continue;
            }
            self.approvals.cancel_approval(&workflow.workflow_id, "emergency stop").await?;
            workflow.status = WorkflowStatus::Terminated;
            workflow.updated_at = Utc::now();
            self.persist_workflow(&workflow).await?;
            drained += 1;
        }
        Ok(drained)
    }

    // --- human-facing control surface --------------------------------------

    /// Applies a human decision for whichever approval the workflow's current
    /// phase implies (`approval` in `Phase::Approval`, `delivery` in
    /// `Phase::Delivery`, `quality_escalation` in `Phase::QualityAssurance`).
    pub async fn submit_approval(
        self: &Arc<Self>,
        workflow_id: &str,
        action: DecisionAction,
        feedback: Option<String>,
    ) -> Result<()> {
        let workflow = self.load_workflow(workflow_id).await?;
        let label = approval_label_for_phase(workflow.phase);
        let decision = Decision::new(label, action, feedback);
        let outcome = self.approvals.submit_decision(workflow_id, decision.clone()).await?;

        if !outcome.had_resolver {
            match label {
                "approval" => self.handle_proposal_decision(workflow_id, decision).await?,
                "delivery" => self.handle_delivery_decision(workflow_id, decision).await?,
                "quality_escalation" => self.handle_quality_escalation_decision(workflow_id, decision).await?,
                _ => {}
            }
            self.spawn_drive(workflow_id.to_string());
        }
        Ok(())
    }

    /// Reassigns a failed worker task (`Retry`), accepts the loss and moves
    /// past it (`Skip`), or ends the workflow outright (`Abort`) — the three
    /// responses to a development-phase escalation (§4.10).
    pub async fn handle_escalation(
        self: &Arc<Self>,
        workflow_id: &str,
        action: forge_wire::EscalationAction,
        _reason: &str,
    ) -> Result<()> {
        match action {
            forge_wire::EscalationAction::Abort => {
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.status = WorkflowStatus::Terminated;
                workflow.updated_at = Utc::now();
                self.persist_workflow(&workflow).await?;
            }
            forge_wire::EscalationAction::Retry => {
                if let Some(mut state) = development::load(&self.store, workflow_id).await? {
                    for task in state.tasks.iter_mut().filter(|t| t.status == forge_wire::SubtaskStatus::Failed) {
                        self.tickets.rollback_status(&task.child_ticket_id, TicketStatus::InProgress).await?;
                        task.status = forge_wire::SubtaskStatus::Working;
                        task.attempts = 0;
                        task.error = None;
                    }
                    self.store.save("runs", &format!("{workflow_id}/progress"), &state).await?;
                }
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.status = WorkflowStatus::Running;
                workflow.phase = Phase::Development;
                self.persist_workflow(&workflow).await?;
                self.spawn_drive(workflow_id.to_string());
            }
            forge_wire::EscalationAction::Skip => {
                if let Some(mut state) = development::load(&self.store, workflow_id).await? {
                    for task in state.tasks.iter_mut().filter(|t| t.status == forge_wire::SubtaskStatus::Failed) {
                        task.status = forge_wire::SubtaskStatus::Skipped;
                    }
                    self.store.save("runs", &format!("{workflow_id}/progress"), &state).await?;
                }
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.status = WorkflowStatus::Running;
                workflow.record_transition(Phase::QualityAssurance, "development settled (failed tasks skipped)");
                self.persist_workflow(&workflow).await?;
                self.spawn_drive(workflow_id.to_string());
            }
        }
        Ok(())
    }

    /// Rolls back to an earlier phase: validates the target precedes the
    /// current phase, cancels any outstanding approval with reason
    /// `"rolled back"`, clears artifacts owned by phases after the target,
    /// records the transition, and resumes the workflow from there.
    pub async fn rollback_to_phase(self: &Arc<Self>, workflow_id: &str, target: Phase) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if target.index() >= workflow.phase.index() {
            return Err(OrchestratorError::PhaseRollbackInvalid {
                detail: format!(
                    "target phase {:?} does not precede current phase {:?}",
                    target, workflow.phase
                ),
            });
        }

        self.approvals.cancel_approval(workflow_id, "rolled back").await?;

        if target.index() < Phase::Delivery.index() {
            workflow.deliverable_id = None;
        }
        workflow.record_transition(target, "rollback: administrative rollback");
        workflow.status = WorkflowStatus::Running;
        self.persist_workflow(&workflow).await?;
        self.spawn_drive(workflow_id.to_string());
        Ok(())
    }

    // --- the phase state machine --------------------------------------------

    fn spawn_drive(self: &Arc<Self>, workflow_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(error) = engine.drive(workflow_id.clone()).await {
                tracing::warn!(workflow_id = %workflow_id, %error, "workflow task ended");
            }
        });
    }

    /// Reads the current phase and dispatches to its handler, looping until
    /// the workflow reaches a terminal status or a handler suspends on a
    /// human decision (at which point this task's stack unwinds and a future
    /// `submit_approval` or restart resumes it).
    async fn drive(self: Arc<Self>, workflow_id: String) -> Result<()> {
        loop {
            let workflow = self.load_workflow(&workflow_id).await?;
            if workflow.status.is_terminal() {
                return Ok(());
            }

            match workflow.phase {
                Phase::Proposal => {
                    self.revise_and_reapprove(&workflow_id, None).await?;
                }
                Phase::Approval => {
                    let decision = self
                        .approvals
                        .request_approval(&workflow_id, "approval", &serde_json::json!({}))
                        .await?;
                    self.handle_proposal_decision(&workflow_id, decision).await?;
                }
                Phase::Development => {
                    self.run_development_stage(&workflow_id).await?;
                }
                Phase::QualityAssurance => {
                    self.run_quality_stage(&workflow_id).await?;
                }
                Phase::Delivery => {
                    let decision = self
                        .approvals
                        .request_approval(&workflow_id, "delivery", &serde_json::json!({}))
                        .await?;
                    self.handle_delivery_decision(&workflow_id, decision).await?;
                }
            }
        }
    }

    async fn handle_proposal_decision(&self, workflow_id: &str, decision: Decision) -> Result<()> {
        match decision.action {
            DecisionAction::Approve => {
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.record_transition(Phase::Development, "approved");
                self.persist_workflow(&workflow).await
            }
            DecisionAction::RequestRevision => self.revise_and_reapprove(workflow_id, decision.feedback).await,
            DecisionAction::Reject => self.fail_workflow(workflow_id, "proposal rejected").await,
        }
    }

    /// Rebuilds the proposal (bumping its version) from the most recent
    /// meeting and re-enters `approval`. Used both for the normal
    /// request-revision response and for a rollback that lands on
    /// `Phase::Proposal`.
    async fn revise_and_reapprove(&self, workflow_id: &str, _feedback: Option<String>) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        let meeting_id = workflow
            .meeting_minutes_ids
            .last()
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidWorkflowState {
                detail: "workflow has no meeting to rebuild a proposal from".to_string(),
            })?;
        let meeting = self
            .meetings
            .get(workflow_id, &meeting_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("meeting {meeting_id}")))?;

        let previous: Option<Proposal> = self.store.load("runs", &format!("{workflow_id}/proposal")).await?;
        let version = previous.map(|p| p.version + 1).unwrap_or(1);
        let proposal = build_proposal(workflow_id, &meeting, version);
        self.store.save("runs", &format!("{workflow_id}/proposal"), &proposal).await?;
        workflow.proposal_id = Some(proposal.id);

        workflow.record_transition(Phase::Approval, "revised proposal drafted");
        workflow.status = WorkflowStatus::WaitingApproval;
        self.persist_workflow(&workflow).await
    }

    async fn run_development_stage(&self, workflow_id: &str) -> Result<()> {
        let proposal: Proposal = self
            .store
            .load("runs", &format!("{workflow_id}/proposal"))
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("proposal for workflow {workflow_id}")))?;

        let mut state = match development::load(&self.store, workflow_id).await? {
            Some(state) if !state.tasks.is_empty() => state,
            _ => {
                self.tickets.update_status(workflow_id, TicketStatus::InProgress).await.ok();
                development::dispatch_development(&self.store, &self.bus, &self.tickets, workflow_id, workflow_id, &proposal)
                    .await?
            }
        };

        let manager = manager_recipient(workflow_id);
        let mut idle_rounds = 0u32;
        loop {
            if state.all_settled() {
                break;
            }
            let messages = self.bus.poll(&manager, self.poll_timeout).await?;
            if messages.is_empty() {
                idle_rounds += 1;
                if idle_rounds >= self.poll_idle_limit {
                    return self
                        .handle_development_failure(
                            workflow_id,
                            &state,
                            &manager,
                            "development phase timed out waiting for worker responses",
                        )
                        .await;
                }
                continue;
            }
            idle_rounds = 0;

            for message in messages {
                let outcome = development::handle_worker_message(
                    &self.store,
                    &self.bus,
                    &self.tickets,
                    &self.retry_policy,
                    &mut state,
                    workflow_id,
                    &message,
                )
                .await?;
                if let development::MessageOutcome::Exhausted { child_ticket_id, error } = outcome {
                    return self.handle_development_failure(workflow_id, &state, &child_ticket_id, &error).await;
                }
            }
        }

        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.record_transition(Phase::QualityAssurance, "development complete");
        self.persist_workflow(&workflow).await
    }

    async fn handle_development_failure(
        &self,
        workflow_id: &str,
        state: &DevelopmentState,
        failing_agent: &str,
        error: &str,
    ) -> Result<()> {
        let category = classify_error(error);
        let action = recommended_action(category);
        let entries = vec![FailureEntry {
            task_id: failing_agent.to_string(),
            category,
            action,
            error: error.to_string(),
        }];
        let report = render_failure_report(workflow_id, &entries);
        self.store
            .write_text("runs", &format!("{workflow_id}/failure-report.md"), &report)
            .await?;

        self.fail_workflow(workflow_id, "development task exhausted its retry budget").await?;

        let attempts = state
            .tasks
            .iter()
            .find(|t| t.child_ticket_id == failing_agent)
            .map(|t| t.attempts)
            .unwrap_or(0);
        self.escalation_sink
            .on_escalation(EscalationPayload {
                run_id: workflow_id.to_string(),
                agent_id: failing_agent.to_string(),
                category,
                error: error.to_string(),
                attempts,
                reason: "development task exhausted its retry budget".to_string(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    async fn run_quality_stage(&self, workflow_id: &str) -> Result<()> {
        let workspace = self.workspace_root.join(workflow_id);
        loop {
            let failure_count = *self.qa_failures.lock().await.get(workflow_id).unwrap_or(&0);
            let outcome =
                qa::run_quality_assurance(&self.quality, &self.reporter, workflow_id, &workspace, &self.qa_config, failure_count)
                    .await?;

            if outcome.result.overall_passed {
                return self.finalize_quality_and_move_to_delivery(workflow_id, "quality gate passed").await;
            }

            {
                let mut counts = self.qa_failures.lock().await;
                *counts.entry(workflow_id.to_string()).or_insert(0) += 1;
            }

            if let DecisionRecommendation::Escalate { escalate_to } = outcome.decision {
                let content = serde_json::json!({ "escalateTo": escalate_to });
                let decision = self.approvals.request_approval(workflow_id, "quality_escalation", &content).await?;
                return self.handle_quality_escalation_decision(workflow_id, decision).await;
            }
            // Retry / Reassign: run another pass.
        }
    }

    async fn handle_quality_escalation_decision(&self, workflow_id: &str, decision: Decision) -> Result<()> {
        match decision.action {
            DecisionAction::Approve => {
                self.qa_failures.lock().await.remove(workflow_id);
                self.finalize_quality_and_move_to_delivery(workflow_id, "quality authority approved despite failing gate")
                    .await
            }
            DecisionAction::RequestRevision => {
                self.qa_failures.lock().await.remove(workflow_id);
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.record_transition(Phase::Development, "rollback: quality escalation requested revision");
                workflow.status = WorkflowStatus::Running;
                self.persist_workflow(&workflow).await
            }
            DecisionAction::Reject => self.fail_workflow(workflow_id, "quality authority rejected the workflow").await,
        }
    }

    async fn finalize_quality_and_move_to_delivery(&self, workflow_id: &str, reason: &str) -> Result<()> {
        let development = development::load(&self.store, workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::InvalidWorkflowState {
                detail: "quality gate finalized before development produced any tasks".to_string(),
            })?;
        let quality = self
            .quality
            .load(workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::InvalidWorkflowState {
                detail: "quality gate finalized with no persisted result".to_string(),
            })?;
        let deliverable = build_deliverable(workflow_id, &development, &quality);
        self.store.save("runs", &format!("{workflow_id}/deliverable"), &deliverable).await?;

        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.deliverable_id = Some(deliverable.id);
        workflow.record_transition(Phase::Delivery, reason);
        workflow.status = WorkflowStatus::WaitingApproval;
        self.persist_workflow(&workflow).await
    }

    async fn handle_delivery_decision(&self, workflow_id: &str, decision: Decision) -> Result<()> {
        match decision.action {
            DecisionAction::Approve => {
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.status = WorkflowStatus::Completed;
                workflow.updated_at = Utc::now();
                self.persist_workflow(&workflow).await?;
                self.tickets.update_status(workflow_id, TicketStatus::Completed).await.ok();
                Ok(())
            }
            DecisionAction::RequestRevision => {
                let mut workflow = self.load_workflow(workflow_id).await?;
                workflow.deliverable_id = None;
                workflow.record_transition(Phase::Development, "rollback: revision requested at delivery");
                workflow.status = WorkflowStatus::Running;
                self.persist_workflow(&workflow).await
            }
            DecisionAction::Reject => self.fail_workflow(workflow_id, "delivery rejected").await,
        }
    }

    async fn fail_workflow(&self, workflow_id: &str, _reason: &str) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.status = WorkflowStatus::Failed;
        workflow.updated_at = Utc::now();
        self.persist_workflow(&workflow).await
    }

    // --- persistence helpers -------------------------------------------------

    async fn persist_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.store.save("runs", &format!("{}/state", workflow.workflow_id), workflow).await
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        self.store
            .load("runs", &format!("{workflow_id}/state"))
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                id: workflow_id.to_string(),
            })
    }

    async fn append_workflow_index(&self, workflow_id: &str) -> Result<()> {
        let mut index: WorkflowIndex = self.store.load("workflows", "_index").await?.unwrap_or_default();
        index.ids.push(workflow_id.to_string());
        self.store.save("workflows", "_index", &index).await
    }
}

fn approval_label_for_phase(phase: Phase) -> &'static str {
    match phase {
        Phase::Delivery => "delivery",
        Phase::QualityAssurance => "quality_escalation",
        _ => "approval",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_retry::NoopEscalationSink;
    use tempfile::tempdir;

    async fn engine() -> (Arc<WorkflowEngine>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let bus = Arc::new(AgentBus::file_backed(dir.path().join("bus"), store.clone()));
        let approvals = Arc::new(ApprovalGate::new(store.clone()));
        let tickets = Arc::new(TicketStore::new(store.clone()));
        let quality = Arc::new(QualityGate::new(store.clone()));
        let meetings = Arc::new(MeetingCoordinator::new(store.clone()));
        let config = QualityGateConfig {
            lint_command: Some(vec!["true".to_string()]),
            test_command: Some(vec!["true".to_string()]),
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };
        let engine = Arc::new(WorkflowEngine::new(
            store,
            bus,
            approvals,
            tickets,
            quality,
            meetings,
            RetryPolicy {
                max_retries: 1,
                initial_delay_ms: 1,
                backoff_multiplier: 2,
                max_delay_ms: 4,
            },
            Arc::new(NoopEscalationSink),
            config,
            dir.path().join("workspace"),
        ));
        (engine, dir)
    }

    async fn wait_until<F: Fn(&Workflow) -> bool>(engine: &WorkflowEngine, workflow_id: &str, predicate: F) -> Workflow {
        for _ in 0..200 {
            let workflow = engine.get_workflow(workflow_id).await.unwrap();
            if predicate(&workflow) {
                return workflow;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached for workflow {workflow_id}");
    }

    #[tokio::test]
    async fn start_workflow_reaches_waiting_approval_at_approval_phase() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        let workflow = wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;
        assert_eq!(workflow.phase, Phase::Approval);
        assert!(engine.get_proposal(&workflow_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn happy_path_runs_through_every_phase_to_completion() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;

        engine.submit_approval(&workflow_id, DecisionAction::Approve, None).await.unwrap();

        // Drain development by completing every dispatched task.
        let manager = manager_recipient(&workflow_id);
        for _ in 0..3 {
            wait_until(&engine, &workflow_id, |_| true).await;
            let state = development::load(&engine_store(&engine), &workflow_id).await.unwrap();
            let Some(state) = state else { continue };
            for task in &state.tasks {
                if task.status == forge_wire::SubtaskStatus::Working {
                    let msg = forge_types::AgentMessage {
                        id: forge_types::new_id(),
                        kind: forge_types::MessageType::TaskComplete,
                        from: task.child_ticket_id.clone(),
                        to: manager.clone(),
                        payload: serde_json::json!({}),
                        timestamp: Utc::now(),
                    };
                    engine.bus.send(msg, Some(&workflow_id)).await.unwrap();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let workflow = wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval && w.phase == Phase::Delivery).await;
        assert_eq!(workflow.phase, Phase::Delivery);

        engine.submit_approval(&workflow_id, DecisionAction::Approve, None).await.unwrap();
        let workflow = wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::Completed).await;
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(engine.get_deliverable(&workflow_id).await.unwrap().is_some());
    }

    fn engine_store(engine: &Arc<WorkflowEngine>) -> Arc<PersistentStore> {
        engine.store.clone()
    }

    #[tokio::test]
    async fn reject_at_approval_fails_the_workflow() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;

        engine.submit_approval(&workflow_id, DecisionAction::Reject, None).await.unwrap();
        let workflow = wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::Failed).await;
        assert_eq!(workflow.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn submit_approval_without_live_waiter_applies_directly() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;

        // Simulate the live drive task having died: cancel its waiter directly,
        // then submit a decision — hadResolver will be false.
        engine.approvals.cancel_approval(&workflow_id, "simulated restart").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.submit_approval(&workflow_id, DecisionAction::Approve, None).await.unwrap();
        let workflow = wait_until(&engine, &workflow_id, |w| w.phase != Phase::Approval || w.status.is_terminal()).await;
        assert_eq!(workflow.phase, Phase::Development);
    }

    #[tokio::test]
    async fn on_restart_resumes_non_terminal_workflows() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;

        let resumed = engine.on_restart().await.unwrap();
        assert_eq!(resumed, 1);
    }

    #[tokio::test]
    async fn cancel_task_terminates_a_waiting_workflow() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;

        engine.cancel_task(&workflow_id).await.unwrap();
        let workflow = engine.get_workflow(&workflow_id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Terminated);
        assert!(!engine.approvals.is_waiting(&workflow_id).await);
    }

    #[tokio::test]
    async fn cancel_task_on_terminal_workflow_is_a_no_op() {
        let (engine, _dir) = engine().await;
        let workflow_id = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::WaitingApproval).await;
        engine.submit_approval(&workflow_id, DecisionAction::Reject, None).await.unwrap();
        wait_until(&engine, &workflow_id, |w| w.status == WorkflowStatus::Failed).await;

        engine.cancel_task(&workflow_id).await.unwrap();
        let workflow = engine.get_workflow(&workflow_id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed, "terminal status must stay put");
    }

    #[tokio::test]
    async fn emergency_stop_drains_every_non_terminal_workflow() {
        let (engine, _dir) = engine().await;
        let a = engine.start_workflow("proj-1", "build a widget").await.unwrap();
        let b = engine.start_workflow("proj-1", "build another widget").await.unwrap();
        wait_until(&engine, &a, |w| w.status == WorkflowStatus::WaitingApproval).await;
        wait_until(&engine, &b, |w| w.status == WorkflowStatus::WaitingApproval).await;

        let drained = engine.emergency_stop().await.unwrap();
        assert_eq!(drained, 2);
        assert_eq!(engine.get_workflow(&a).await.unwrap().status, WorkflowStatus::Terminated);
        assert_eq!(engine.get_workflow(&b).await.unwrap().status, WorkflowStatus::Terminated);
    }
}
