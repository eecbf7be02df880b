use crate::chatlog::{ChatLogCapture, ChatLogCategory};
use crate::queue::MessageQueue;
use forge_store::PersistentStore;
use forge_types::{AgentMessage, MessageType, OrchestratorError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Wraps the `MessageQueue` with envelope validation, a human-readable
/// `messages.log` per workflow, and chat-log capture (§4.3). This is the
/// surface agents actually call; `MessageQueue` and `ChatLogCapture` are
/// lower-level collaborators.
pub struct AgentBus {
    queue: MessageQueue,
    store: Arc<PersistentStore>,
}

impl AgentBus {
    pub fn new(queue: MessageQueue, store: Arc<PersistentStore>) -> Self {
        Self { queue, store }
    }

    pub fn file_backed(bus_dir: impl Into<std::path::PathBuf>, store: Arc<PersistentStore>) -> Self {
        Self::new(MessageQueue::file_backed(bus_dir), store)
    }

    /// Validates and sends a single-recipient message, appending a
    /// human-readable line to `runs/<workflowId>/messages.log` and a
    /// chat-log entry when `workflow_id` is known.
    pub async fn send(&self, msg: AgentMessage, workflow_id: Option<&str>) -> Result<()> {
        Self::validate_envelope(&msg)?;
        self.record(&msg, workflow_id).await?;
        self.queue.send(msg).await
    }

    /// Validates and broadcasts to every known recipient except the sender.
    pub async fn broadcast(&self, msg: AgentMessage, workflow_id: Option<&str>) -> Result<()> {
        if !msg.is_broadcast() {
            return Err(OrchestratorError::BusValidation(
                "broadcast message must target the broadcast sentinel".to_string(),
            ));
        }
        Self::validate_envelope(&msg)?;
        self.record(&msg, workflow_id).await?;
        self.queue.broadcast(msg).await
    }

    pub async fn poll(&self, agent_id: &str, timeout: Duration) -> Result<Vec<AgentMessage>> {
        self.queue.poll(agent_id, timeout).await
    }

    pub async fn register_recipient(&self, agent_id: &str) {
        self.queue.register_recipient(agent_id).await;
    }

    /// Merges queue history (still-undelivered messages) and log history
    /// (every message ever sent, delivered or not) by id, sorted by
    /// timestamp ascending. A broadcast appears exactly once even though the
    /// queue layer physically enqueues one copy per recipient, because the
    /// log line is written once per logical send, not once per fan-out copy.
    pub async fn get_message_history(&self, workflow_id: &str) -> Result<Vec<AgentMessage>> {
        let mut by_id: HashMap<String, AgentMessage> = HashMap::new();

        for recipient in self.queue.known_recipients().await {
            for msg in self.queue.history_for(&recipient).await? {
                by_id.entry(msg.id.clone()).or_insert(msg);
            }
        }

        let log_text = self
            .store
            .read_log("runs", &format!("{workflow_id}/messages"))
            .await?;
        for line in log_text.lines() {
            if let Ok(msg) = serde_json::from_str::<AgentMessage>(line) {
                by_id.entry(msg.id.clone()).or_insert(msg);
            }
        }

        let mut merged: Vec<AgentMessage> = by_id.into_values().collect();
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(merged)
    }

    fn validate_envelope(msg: &AgentMessage) -> Result<()> {
        if msg.id.trim().is_empty() {
            return Err(OrchestratorError::BusValidation("message id must not be empty".into()));
        }
        if msg.from.trim().is_empty() {
            return Err(OrchestratorError::BusValidation("message from must not be empty".into()));
        }
        if !msg.is_broadcast() && msg.to.trim().is_empty() {
            return Err(OrchestratorError::BusValidation(
                "message to must not be empty unless broadcasting".into(),
            ));
        }
        Ok(())
    }

    async fn record(&self, msg: &AgentMessage, workflow_id: Option<&str>) -> Result<()> {
        let Some(workflow_id) = workflow_id else {
            return Ok(());
        };
        let line = serde_json::to_string(msg)?;
        self.store
            .append_log("runs", &format!("{workflow_id}/messages"), &line)
            .await?;

        let category = categorize(msg.kind);
        let log = ChatLogCapture::new(&self.store);
        log.capture(
            category,
            &msg.from,
            &msg.to,
            &render_payload_preview(msg),
            Some(workflow_id.to_string()),
        )
        .await?;
        Ok(())
    }
}

fn categorize(kind: MessageType) -> ChatLogCategory {
    match kind {
        MessageType::TaskAssign | MessageType::TaskComplete | MessageType::TaskFailed => {
            ChatLogCategory::TaskAssignment
        }
        MessageType::ReviewRequest | MessageType::ReviewResponse => ChatLogCategory::ReviewFeedback,
        MessageType::Escalate | MessageType::ConflictEscalate => ChatLogCategory::Escalation,
        MessageType::StatusRequest | MessageType::StatusResponse => ChatLogCategory::General,
    }
}

fn render_payload_preview(msg: &AgentMessage) -> String {
    msg.payload
        .as_object()
        .and_then(|obj| obj.get("summary").or_else(|| obj.get("content")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| msg.payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::MessageType;
    use tempfile::tempdir;

    fn msg(id: &str, kind: MessageType, from: &str, to: &str) -> AgentMessage {
        AgentMessage {
            id: id.into(),
            kind,
            from: from.into(),
            to: to.into(),
            payload: serde_json::json!({ "summary": "hello" }),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn send_rejects_empty_recipient() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let bus = AgentBus::file_backed(dir.path().join("bus"), store);
        let bad = msg("m1", MessageType::StatusRequest, "manager", "");
        let result = bus.send(bad, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_then_history_contains_message_by_id() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let bus = AgentBus::file_backed(dir.path().join("bus"), store);
        bus.send(msg("m1", MessageType::TaskAssign, "manager", "worker1"), Some("wf-1"))
            .await
            .unwrap();

        let history = bus.get_message_history("wf-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "m1");
    }

    #[tokio::test]
    async fn broadcast_appears_once_in_history_despite_fanout() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let bus = AgentBus::file_backed(dir.path().join("bus"), store);
        bus.register_recipient("worker1").await;
        bus.register_recipient("worker2").await;
        bus.broadcast(
            msg("b1", MessageType::Escalate, "manager", forge_types::BROADCAST_RECIPIENT),
            Some("wf-1"),
        )
        .await
        .unwrap();

        let history = bus.get_message_history("wf-1").await.unwrap();
        let matching: Vec<_> = history.iter().filter(|m| m.id == "b1").collect();
        assert_eq!(matching.len(), 1, "broadcast must not appear twice in merged history");
    }
}
