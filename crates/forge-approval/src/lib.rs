//! Human approval rendezvous: a producer (the workflow engine) calls
//! [`ApprovalGate::request_approval`] and suspends until a consumer (the
//! OrchestratorAPI, acting for the human CEO) calls
//! [`ApprovalGate::submit_decision`] or [`ApprovalGate::cancel_approval`].
//!
//! The rendezvous handle itself (a `oneshot` sender) is process-local and
//! cannot be serialized, so only the decision is persisted; restart logic
//! rebuilds handles lazily by calling `request_approval` again rather than
//! trying to reconstruct a live channel from disk.

use chrono::{DateTime, Utc};
use forge_store::PersistentStore;
use forge_types::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// The three actions a human can take on a pending approval (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    RequestRevision,
    Reject,
}

/// One accepted decision, appended to `runs/<id>/approvals.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub phase: String,
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(phase: impl Into<String>, action: DecisionAction, feedback: Option<String>) -> Self {
        Self {
            phase: phase.into(),
            action,
            feedback,
            decided_at: Utc::now(),
        }
    }
}

/// The persisted document at `runs/<id>/approvals.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub workflow_id: String,
    pub decisions: Vec<Decision>,
}

/// Returned by `submit_decision`: whether an in-memory rendezvous was woken
/// by this call. `false` means the decision was only persisted (no waiter —
/// e.g. the producing task died in a prior process) and the caller must
/// drive the workflow forward itself rather than rely on a suspended task
/// resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub had_resolver: bool,
}

enum WaiterResolution {
    Decided(Decision),
    Cancelled(String),
}

/// Human rendezvous gate, one instance shared process-wide. Only one
/// outstanding request per workflow is permitted (§4.5).
pub struct ApprovalGate {
    store: Arc<PersistentStore>,
    waiters: Mutex<HashMap<String, oneshot::Sender<WaiterResolution>>>,
}

impl ApprovalGate {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Suspends the caller until a matching `submit_decision` or
    /// `cancel_approval` arrives. `content` is not persisted by the gate
    /// itself (the workflow engine already owns the proposal/deliverable
    /// document); it exists purely so callers have a single call site taking
    /// the workflow id, the approval's phase label, and the content under
    /// review together.
    pub async fn request_approval(
        &self,
        workflow_id: &str,
        phase: &str,
        _content: &Value,
    ) -> Result<Decision> {
        let rx = {
            let mut waiters = self.waiters.lock().await;
            if waiters.contains_key(workflow_id) {
                return Err(OrchestratorError::ApprovalAlreadyWaiting {
                    workflow_id: workflow_id.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            waiters.insert(workflow_id.to_string(), tx);
            rx
        };

        tracing::info!(workflow_id, phase, "approval requested, suspending for human decision");

        match rx.await {
            Ok(WaiterResolution::Decided(decision)) => Ok(decision),
            Ok(WaiterResolution::Cancelled(reason)) => {
                Err(OrchestratorError::ApprovalCancelled { reason })
            }
            Err(_) => Err(OrchestratorError::ApprovalCancelled {
                reason: "approval rendezvous dropped without a decision".to_string(),
            }),
        }
    }

    /// Accepts a decision: always persists it to `approvals.json`, then
    /// either resolves a live rendezvous (`had_resolver=true`) or, if none
    /// exists (e.g. after a restart), leaves it persisted only
    /// (`had_resolver=false`) so the caller knows to advance the workflow
    /// directly.
    pub async fn submit_decision(&self, workflow_id: &str, decision: Decision) -> Result<SubmitOutcome> {
        self.append_decision(workflow_id, &decision).await?;

        let mut waiters = self.waiters.lock().await;
        if let Some(tx) = waiters.remove(workflow_id) {
            let _ = tx.send(WaiterResolution::Decided(decision));
            Ok(SubmitOutcome { had_resolver: true })
        } else {
            Ok(SubmitOutcome { had_resolver: false })
        }
    }

    /// Fails a suspended request with a typed error. No-op if nothing is
    /// waiting (rollback may call this defensively).
    pub async fn cancel_approval(&self, workflow_id: &str, reason: &str) -> Result<()> {
        let mut waiters = self.waiters.lock().await;
        if let Some(tx) = waiters.remove(workflow_id) {
            let _ = tx.send(WaiterResolution::Cancelled(reason.to_string()));
        }
        Ok(())
    }

    /// `status=waiting_approval` iff this returns `true` for the workflow
    /// (§8 invariant).
    pub async fn is_waiting(&self, workflow_id: &str) -> bool {
        self.waiters.lock().await.contains_key(workflow_id)
    }

    pub async fn get_approval_history(&self, workflow_id: &str) -> Result<Vec<Decision>> {
        Ok(self.load_approvals(workflow_id).await?.decisions)
    }

    /// Reloads the full approval record from disk, independent of in-memory
    /// rendezvous state. Used on process restart.
    pub async fn load_approvals(&self, workflow_id: &str) -> Result<ApprovalRecord> {
        let record: Option<ApprovalRecord> = self
            .store
            .load("runs", &format!("{workflow_id}/approvals"))
            .await?;
        Ok(record.unwrap_or_else(|| ApprovalRecord {
            workflow_id: workflow_id.to_string(),
            decisions: Vec::new(),
        }))
    }

    async fn append_decision(&self, workflow_id: &str, decision: &Decision) -> Result<()> {
        let mut record = self.load_approvals(workflow_id).await?;
        record.decisions.push(decision.clone());
        self.store
            .save("runs", &format!("{workflow_id}/approvals"), &record)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate() -> (ApprovalGate, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        (ApprovalGate::new(store), dir)
    }

    #[tokio::test]
    async fn second_request_before_resolution_is_rejected() {
        let (gate, _dir) = gate();
        let gate = Arc::new(gate);
        let g2 = gate.clone();
        let handle = tokio::spawn(async move {
            g2.request_approval("wf-1", "approval", &Value::Null).await
        });
        tokio::task::yield_now().await;

        let err = gate
            .request_approval("wf-1", "approval", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ApprovalAlreadyWaiting { .. }));

        gate.submit_decision(
            "wf-1",
            Decision::new("approval", DecisionAction::Approve, None),
        )
        .await
        .unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn submit_decision_resolves_live_waiter() {
        let (gate, _dir) = gate();
        let gate = Arc::new(gate);
        let g2 = gate.clone();
        let handle = tokio::spawn(async move {
            g2.request_approval("wf-1", "approval", &Value::Null).await
        });
        tokio::task::yield_now().await;
        assert!(gate.is_waiting("wf-1").await);

        let outcome = gate
            .submit_decision(
                "wf-1",
                Decision::new("approval", DecisionAction::Approve, None),
            )
            .await
            .unwrap();
        assert!(outcome.had_resolver);

        let decision = handle.await.unwrap().unwrap();
        assert_eq!(decision.action, DecisionAction::Approve);
        assert!(!gate.is_waiting("wf-1").await);
    }

    #[tokio::test]
    async fn submit_decision_without_waiter_persists_and_reports_no_resolver() {
        let (gate, _dir) = gate();
        let outcome = gate
            .submit_decision(
                "wf-2",
                Decision::new("delivery", DecisionAction::Approve, None),
            )
            .await
            .unwrap();
        assert!(!outcome.had_resolver);

        let history = gate.get_approval_history("wf-2").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].phase, "delivery");
    }

    #[tokio::test]
    async fn cancel_approval_fails_the_suspended_request() {
        let (gate, _dir) = gate();
        let gate = Arc::new(gate);
        let g2 = gate.clone();
        let handle = tokio::spawn(async move {
            g2.request_approval("wf-3", "approval", &Value::Null).await
        });
        tokio::task::yield_now().await;

        gate.cancel_approval("wf-3", "rolled back").await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::ApprovalCancelled { reason } if reason == "rolled back"));
    }

    #[tokio::test]
    async fn load_approvals_survives_reload() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let gate = ApprovalGate::new(store.clone());
        gate.submit_decision(
            "wf-4",
            Decision::new("approval", DecisionAction::RequestRevision, Some("narrow the scope".into())),
        )
        .await
        .unwrap();

        let reloaded_gate = ApprovalGate::new(store);
        let record = reloaded_gate.load_approvals("wf-4").await.unwrap();
        assert_eq!(record.decisions.len(), 1);
        assert_eq!(record.decisions[0].feedback.as_deref(), Some("narrow the scope"));
    }
}
