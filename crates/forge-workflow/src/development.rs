//! Development-phase dispatch and worker-message handling: tracks progress
//! over the ticket tree's child/grandchild tiers, addressed over the message
//! bus, rather than a single flat task list.
//!
//! Addressing convention: the manager's bus identity is `manager:<workflowId>`;
//! each dispatched task's worker is addressed by its own child ticket id, with
//! `taskId` embedded in every payload for correlation.

use chrono::Utc;
use forge_bus::AgentBus;
use forge_retry::{classify_error, recommended_action, RetryPolicy};
use forge_tickets::TicketStore;
use forge_types::{AgentMessage, MessageType, Proposal, Result, TicketStatus, WorkerType};
use forge_wire::{SubtaskProgressItem, SubtaskStatus, WireProgress};
use forge_store::PersistentStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bus identity the manager listens on for one workflow's worker traffic.
pub fn manager_recipient(workflow_id: &str) -> String {
    format!("manager:{workflow_id}")
}

fn worker_type_for(label: &str) -> WorkerType {
    match label {
        "designer" => WorkerType::Designer,
        "developer" => WorkerType::Developer,
        "test" => WorkerType::Test,
        "reviewer" => WorkerType::Reviewer,
        "research" => WorkerType::Research,
        _ => WorkerType::Design,
    }
}

/// Internal, durable record of one dispatched task. Distinct from
/// `forge_wire::SubtaskProgressItem` (outbound-only, no `Deserialize`)
/// because this is what gets persisted and reloaded across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_number: u32,
    pub child_ticket_id: String,
    pub title: String,
    pub worker_type: WorkerType,
    pub status: SubtaskStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DevelopmentState {
    pub workflow_id: String,
    pub tasks: Vec<TaskProgress>,
}

impl DevelopmentState {
    pub fn completion_rate(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let settled = self
            .tasks
            .iter()
            .filter(|t| matches!(t.status, SubtaskStatus::Completed | SubtaskStatus::Skipped))
            .count();
        settled as f64 / self.tasks.len() as f64
    }

    /// True once every task has reached a terminal status (completed or
    /// failed), i.e. there is nothing left to wait for.
    pub fn all_settled(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| matches!(t.status, SubtaskStatus::Completed | SubtaskStatus::Failed | SubtaskStatus::Skipped))
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| matches!(t.status, SubtaskStatus::Failed))
    }

    pub fn to_wire(&self) -> WireProgress {
        WireProgress {
            workflow_id: self.workflow_id.clone(),
            completion_rate: self.completion_rate(),
            tasks: self
                .tasks
                .iter()
                .map(|t| SubtaskProgressItem {
                    task_id: t.child_ticket_id.clone(),
                    title: t.title.clone(),
                    status: t.status,
                    worker_type: t.worker_type,
                    error: t.error.clone(),
                })
                .collect(),
        }
    }

    fn task_mut(&mut self, child_ticket_id: &str) -> Option<&mut TaskProgress> {
        self.tasks.iter_mut().find(|t| t.child_ticket_id == child_ticket_id)
    }
}

async fn persist(store: &PersistentStore, state: &DevelopmentState) -> Result<()> {
    store
        .save("runs", &format!("{}/progress", state.workflow_id), state)
        .await
}

pub async fn load(store: &PersistentStore, workflow_id: &str) -> Result<Option<DevelopmentState>> {
    store.load("runs", &format!("{workflow_id}/progress")).await
}

/// Creates one child ticket per `proposal.task_breakdown` entry, sends a
/// `task_assign` message for each, and persists the initial progress
/// snapshot. Every task starts `working`: there is no real worker queue to
/// wait on in this layer, so dispatch and "work started" are the same step.
pub async fn dispatch_development(
    store: &PersistentStore,
    bus: &AgentBus,
    tickets: &TicketStore,
    parent_ticket_id: &str,
    workflow_id: &str,
    proposal: &Proposal,
) -> Result<DevelopmentState> {
    let manager = manager_recipient(workflow_id);
    let mut tasks = Vec::with_capacity(proposal.task_breakdown.len());

    for item in &proposal.task_breakdown {
        let worker_type = worker_type_for(&item.worker_type);
        let child = tickets.add_child(parent_ticket_id, worker_type, item.title.clone()).await?;
        tickets.update_status(&child.id, TicketStatus::InProgress).await?;
        bus.register_recipient(&child.id).await;

        let msg = AgentMessage {
            id: forge_types::new_id(),
            kind: MessageType::TaskAssign,
            from: manager.clone(),
            to: child.id.clone(),
            payload: serde_json::json!({
                "taskId": child.id,
                "taskNumber": item.task_number,
                "title": item.title,
                "workerType": item.worker_type,
                "estimatedEffort": item.estimated_effort,
            }),
            timestamp: Utc::now(),
        };
        bus.send(msg, Some(workflow_id)).await?;

        tasks.push(TaskProgress {
            task_number: item.task_number,
            child_ticket_id: child.id,
            title: item.title.clone(),
            worker_type,
            status: SubtaskStatus::Working,
            attempts: 1,
            error: None,
        });
    }

    let state = DevelopmentState {
        workflow_id: workflow_id.to_string(),
        tasks,
    };
    persist(store, &state).await?;
    Ok(state)
}

/// Outcome of processing one worker message: either the state simply
/// advanced, or a task exhausted its retry budget and the caller should
/// escalate.
pub enum MessageOutcome {
    Advanced,
    RetryScheduled { delay: std::time::Duration },
    Exhausted { child_ticket_id: String, error: String },
}

/// Applies one bus message to the development state and the owning ticket.
/// `review_response` with `approved: false` moves the ticket back to
/// `revision_required` (not `failed`) and redispatches — a worker asked to
/// revise has not failed, it has more work to do.
pub async fn handle_worker_message(
    store: &PersistentStore,
    bus: &AgentBus,
    tickets: &TicketStore,
    policy: &RetryPolicy,
    state: &mut DevelopmentState,
    workflow_id: &str,
    msg: &AgentMessage,
) -> Result<MessageOutcome> {
    let child_ticket_id = msg.from.clone();

    match msg.kind {
        MessageType::TaskComplete => {
            tickets.update_status(&child_ticket_id, TicketStatus::Completed).await?;
            if let Some(task) = state.task_mut(&child_ticket_id) {
                task.status = SubtaskStatus::Completed;
                task.error = None;
            }
            persist(store, state).await?;
            Ok(MessageOutcome::Advanced)
        }
        MessageType::ReviewRequest => {
            tickets.update_status(&child_ticket_id, TicketStatus::ReviewRequested).await?;
            if let Some(task) = state.task_mut(&child_ticket_id) {
                task.status = SubtaskStatus::Review;
            }
            persist(store, state).await?;
            Ok(MessageOutcome::Advanced)
        }
        MessageType::ReviewResponse => {
            let approved = msg.payload.get("approved").and_then(|v| v.as_bool()).unwrap_or(false);
            if approved {
                tickets.update_status(&child_ticket_id, TicketStatus::Completed).await?;
                if let Some(task) = state.task_mut(&child_ticket_id) {
                    task.status = SubtaskStatus::Completed;
                }
                persist(store, state).await?;
                Ok(MessageOutcome::Advanced)
            } else {
                tickets.update_status(&child_ticket_id, TicketStatus::RevisionRequired).await?;
                tickets.update_status(&child_ticket_id, TicketStatus::InProgress).await?;
                if let Some(task) = state.task_mut(&child_ticket_id) {
                    task.status = SubtaskStatus::Working;
                }
                persist(store, state).await?;
                redispatch(bus, workflow_id, &child_ticket_id, state).await?;
                Ok(MessageOutcome::Advanced)
            }
        }
        MessageType::TaskFailed => {
            let error = msg
                .payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown worker error")
                .to_string();

            let attempts = state.task_mut(&child_ticket_id).map(|t| {
                t.attempts += 1;
                t.error = Some(error.clone());
                t.attempts
            });
            let Some(attempts) = attempts else {
                return Ok(MessageOutcome::Advanced);
            };

            if attempts <= policy.max_retries + 1 {
                persist(store, state).await?;
                redispatch(bus, workflow_id, &child_ticket_id, state).await?;
                Ok(MessageOutcome::RetryScheduled {
                    delay: policy.delay_for_attempt(attempts.saturating_sub(1)),
                })
            } else {
                tickets.update_status(&child_ticket_id, TicketStatus::Failed).await?;
                if let Some(task) = state.task_mut(&child_ticket_id) {
                    task.status = SubtaskStatus::Failed;
                }
                persist(store, state).await?;

                let category = classify_error(&error);
                let action = recommended_action(category);
                let line = format!(
                    "[{}] [{}_ERROR] [RECOVERABLE] development task {child_ticket_id} exhausted retries ({attempts} attempts), recommended action {action:?}: {error}",
                    Utc::now().to_rfc3339(),
                    category.as_str().to_uppercase(),
                );
                store.append_log("runs", &format!("{workflow_id}/errors"), &line).await?;

                Ok(MessageOutcome::Exhausted {
                    child_ticket_id,
                    error,
                })
            }
        }
        MessageType::Escalate
        | MessageType::ConflictEscalate
        | MessageType::StatusRequest
        | MessageType::StatusResponse
        | MessageType::TaskAssign => Ok(MessageOutcome::Advanced),
    }
}

async fn redispatch(
    bus: &AgentBus,
    workflow_id: &str,
    child_ticket_id: &str,
    state: &DevelopmentState,
) -> Result<()> {
    let Some(task) = state.tasks.iter().find(|t| t.child_ticket_id == child_ticket_id) else {
        return Ok(());
    };
    let msg = AgentMessage {
        id: forge_types::new_id(),
        kind: MessageType::TaskAssign,
        from: manager_recipient(workflow_id),
        to: child_ticket_id.to_string(),
        payload: serde_json::json!({
            "taskId": child_ticket_id,
            "taskNumber": task.task_number,
            "title": task.title,
            "attempt": task.attempts,
        }),
        timestamp: Utc::now(),
    };
    bus.send(msg, Some(workflow_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{Risk, RiskSeverity, TaskBreakdownItem, WorkerAssignment};
    use tempfile::tempdir;

    fn proposal() -> Proposal {
        Proposal {
            id: "p1".into(),
            workflow_id: "wf-1".into(),
            summary: "s".into(),
            scope: "scope".into(),
            task_breakdown: vec![TaskBreakdownItem {
                task_number: 1,
                title: "Design the solution".into(),
                worker_type: "designer".into(),
                estimated_effort: "1d".into(),
                dependencies: Vec::new(),
            }],
            worker_assignments: vec![WorkerAssignment {
                task_number: 1,
                agent_id: "designer-wf-1".into(),
                worker_type: "designer".into(),
            }],
            risks: vec![Risk {
                severity: RiskSeverity::Medium,
                description: "d".into(),
                mitigation: "m".into(),
            }],
            meeting_id: "m1".into(),
            version: 1,
        }
    }

    async fn harness() -> (Arc<PersistentStore>, AgentBus, TicketStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let bus = AgentBus::file_backed(dir.path().join("bus"), store.clone());
        let tickets = TicketStore::new(store.clone());
        (store, bus, tickets, dir)
    }

    #[tokio::test]
    async fn dispatch_creates_one_child_per_task_and_sends_assign() {
        let (store, bus, tickets, _dir) = harness().await;
        let parent = tickets
            .create_parent("proj-1", "do it", forge_types::TicketMeta::default())
            .await
            .unwrap();

        let state = dispatch_development(&store, &bus, &tickets, &parent.id, "wf-1", &proposal())
            .await
            .unwrap();
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].status, SubtaskStatus::Working);

        let history = bus.get_message_history("wf-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageType::TaskAssign);
    }

    #[tokio::test]
    async fn task_complete_marks_task_and_ticket_completed() {
        let (store, bus, tickets, _dir) = harness().await;
        let parent = tickets
            .create_parent("proj-1", "do it", forge_types::TicketMeta::default())
            .await
            .unwrap();
        let mut state = dispatch_development(&store, &bus, &tickets, &parent.id, "wf-1", &proposal())
            .await
            .unwrap();
        let child_id = state.tasks[0].child_ticket_id.clone();
        let policy = RetryPolicy::default();

        let msg = AgentMessage {
            id: "m1".into(),
            kind: MessageType::TaskComplete,
            from: child_id.clone(),
            to: manager_recipient("wf-1"),
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        let outcome = handle_worker_message(&store, &bus, &tickets, &policy, &mut state, "wf-1", &msg)
            .await
            .unwrap();
        assert!(matches!(outcome, MessageOutcome::Advanced));
        assert_eq!(state.tasks[0].status, SubtaskStatus::Completed);
        assert!(state.all_settled());

        let ticket = tickets.get_child(&child_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Completed);
    }

    #[tokio::test]
    async fn review_rejection_rolls_back_to_revision_required_not_failed() {
        let (store, bus, tickets, _dir) = harness().await;
        let parent = tickets
            .create_parent("proj-1", "do it", forge_types::TicketMeta::default())
            .await
            .unwrap();
        let mut state = dispatch_development(&store, &bus, &tickets, &parent.id, "wf-1", &proposal())
            .await
            .unwrap();
        let child_id = state.tasks[0].child_ticket_id.clone();
        let policy = RetryPolicy::default();

        tickets.update_status(&child_id, TicketStatus::ReviewRequested).await.unwrap();

        let msg = AgentMessage {
            id: "m1".into(),
            kind: MessageType::ReviewResponse,
            from: child_id.clone(),
            to: manager_recipient("wf-1"),
            payload: serde_json::json!({ "approved": false }),
            timestamp: Utc::now(),
        };
        handle_worker_message(&store, &bus, &tickets, &policy, &mut state, "wf-1", &msg)
            .await
            .unwrap();

        assert_eq!(state.tasks[0].status, SubtaskStatus::Working);
        let ticket = tickets.get_child(&child_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);

        let history = bus.get_message_history("wf-1").await.unwrap();
        assert_eq!(history.iter().filter(|m| m.kind == MessageType::TaskAssign).count(), 2);
    }

    #[tokio::test]
    async fn task_failed_retries_until_budget_then_exhausts() {
        let (store, bus, tickets, _dir) = harness().await;
        let parent = tickets
            .create_parent("proj-1", "do it", forge_types::TicketMeta::default())
            .await
            .unwrap();
        let mut state = dispatch_development(&store, &bus, &tickets, &parent.id, "wf-1", &proposal())
            .await
            .unwrap();
        let child_id = state.tasks[0].child_ticket_id.clone();
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            backoff_multiplier: 2,
            max_delay_ms: 4,
        };

        let failed = AgentMessage {
            id: "m1".into(),
            kind: MessageType::TaskFailed,
            from: child_id.clone(),
            to: manager_recipient("wf-1"),
            payload: serde_json::json!({ "error": "connection refused" }),
            timestamp: Utc::now(),
        };

        let first = handle_worker_message(&store, &bus, &tickets, &policy, &mut state, "wf-1", &failed)
            .await
            .unwrap();
        assert!(matches!(first, MessageOutcome::RetryScheduled { .. }));

        let second = handle_worker_message(&store, &bus, &tickets, &policy, &mut state, "wf-1", &failed)
            .await
            .unwrap();
        assert!(matches!(second, MessageOutcome::Exhausted { .. }));
        assert_eq!(state.tasks[0].status, SubtaskStatus::Failed);

        let ticket = tickets.get_child(&child_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Failed);

        let log = store.read_log("runs", "wf-1/errors").await.unwrap();
        assert!(log.contains("exhausted retries"));
    }
}
