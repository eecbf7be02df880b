use async_trait::async_trait;
use forge_types::{AgentMessage, OrchestratorError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

/// Abstraction seam for the queue backend (§4.2: "at least one file-backed
/// implementation plus abstract seams for embedded-KV and network queues").
/// Only the file backend is implemented here; the trait is what a future
/// embedded-KV or network backend would plug into.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, recipient: &str, msg: &AgentMessage) -> Result<()>;
    /// Returns all currently-queued messages for `recipient`, oldest first,
    /// and removes them (poll acks implicitly, per §4.2).
    async fn drain(&self, recipient: &str) -> Result<Vec<AgentMessage>>;
    /// Non-destructive full history for a recipient, used by `history()`.
    async fn peek_all(&self, recipient: &str) -> Result<Vec<AgentMessage>>;
}

/// Directory-of-files backend: `state/bus/<recipientId>/<sortkey>.json`,
/// matching the persisted layout in §6. The sort key embeds a nanosecond
/// timestamp so directory listing order is delivery order.
pub struct FileQueueBackend {
    base_dir: PathBuf,
}

impl FileQueueBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn recipient_dir(&self, recipient: &str) -> PathBuf {
        self.base_dir.join(recipient)
    }

    fn sort_key(msg: &AgentMessage) -> String {
        format!("{:019}-{}", msg.timestamp.timestamp_nanos_opt().unwrap_or_default().max(0), msg.id)
    }

    async fn list_sorted(&self, recipient: &str) -> Result<Vec<PathBuf>> {
        let dir = self.recipient_dir(recipient);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OrchestratorError::Queue(e.to_string())),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::Queue(e.to_string()))?
        {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn read_all(&self, paths: &[PathBuf]) -> Result<Vec<AgentMessage>> {
        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| OrchestratorError::Queue(e.to_string()))?;
            messages.push(serde_json::from_slice(&bytes)?);
        }
        Ok(messages)
    }
}

#[async_trait]
impl QueueBackend for FileQueueBackend {
    async fn enqueue(&self, recipient: &str, msg: &AgentMessage) -> Result<()> {
        let dir = self.recipient_dir(recipient);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", Self::sort_key(msg)));
        let content = serde_json::to_vec_pretty(msg)?;
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn drain(&self, recipient: &str) -> Result<Vec<AgentMessage>> {
        let paths = self.list_sorted(recipient).await?;
        let messages = self.read_all(&paths).await?;
        for path in &paths {
            let _ = tokio::fs::remove_file(path).await;
        }
        Ok(messages)
    }

    async fn peek_all(&self, recipient: &str) -> Result<Vec<AgentMessage>> {
        let paths = self.list_sorted(recipient).await?;
        self.read_all(&paths).await
    }
}

/// Per-recipient FIFO durable queue with poll semantics and broadcast
/// fan-out (§4.2). Delivery is at-least-once under the file backend;
/// `AgentBus` is responsible for de-duplicating by message id on history
/// merge.
pub struct MessageQueue {
    backend: Arc<dyn QueueBackend>,
    known_recipients: RwLock<std::collections::HashSet<String>>,
    wakers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl MessageQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            known_recipients: RwLock::new(std::collections::HashSet::new()),
            wakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn file_backed(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileQueueBackend::new(base_dir)))
    }

    /// Registers `agent_id` as a known recipient so future broadcasts reach
    /// it. Idempotent.
    pub async fn register_recipient(&self, agent_id: &str) {
        self.known_recipients.write().await.insert(agent_id.to_string());
    }

    async fn notify_for(&self, recipient: &str) -> Arc<Notify> {
        let mut guard = self.wakers.lock().await;
        guard
            .entry(recipient.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Enqueues `msg` for its single recipient and registers both ends as
    /// known recipients (a sender implicitly becomes reachable for replies).
    pub async fn send(&self, msg: AgentMessage) -> Result<()> {
        self.register_recipient(&msg.from).await;
        self.register_recipient(&msg.to).await;
        self.backend.enqueue(&msg.to, &msg).await?;
        self.notify_for(&msg.to).await.notify_waiters();
        Ok(())
    }

    /// Fans `msg` out to every known recipient except the sender. The
    /// message recorded in history is the single logical broadcast, not one
    /// copy per recipient (§9 open-question resolution).
    pub async fn broadcast(&self, msg: AgentMessage) -> Result<()> {
        self.register_recipient(&msg.from).await;
        let recipients: Vec<String> = self
            .known_recipients
            .read()
            .await
            .iter()
            .filter(|r| *r != &msg.from)
            .cloned()
            .collect();
        for recipient in &recipients {
            self.backend.enqueue(recipient, &msg).await?;
            self.notify_for(recipient).await.notify_waiters();
        }
        Ok(())
    }

    /// Bounded wait: returns immediately if messages are already queued,
    /// otherwise parks up to `timeout` before returning whatever (possibly
    /// nothing) has arrived.
    pub async fn poll(&self, agent_id: &str, timeout: Duration) -> Result<Vec<AgentMessage>> {
        let ready = self.backend.peek_all(agent_id).await?;
        if !ready.is_empty() {
            return self.backend.drain(agent_id).await;
        }
        let notify = self.notify_for(agent_id).await;
        let _ = tokio::time::timeout(timeout, notify.notified()).await;
        self.backend.drain(agent_id).await
    }

    /// Full per-recipient history without consuming the queue, used to
    /// reconstruct `getMessageHistory` for the bus layer.
    pub async fn history_for(&self, agent_id: &str) -> Result<Vec<AgentMessage>> {
        self.backend.peek_all(agent_id).await
    }

    pub async fn known_recipients(&self) -> Vec<String> {
        self.known_recipients.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{MessageType, BROADCAST_RECIPIENT};
    use tempfile::tempdir;

    fn msg(id: &str, from: &str, to: &str) -> AgentMessage {
        AgentMessage {
            id: id.into(),
            kind: MessageType::StatusRequest,
            from: from.into(),
            to: to.into(),
            payload: serde_json::Value::Null,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn send_then_poll_returns_message_and_drains() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::file_backed(dir.path());
        queue.send(msg("m1", "manager", "worker1")).await.unwrap();
        let polled = queue.poll("worker1", Duration::from_millis(50)).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, "m1");

        let again = queue.poll("worker1", Duration::from_millis(10)).await.unwrap();
        assert!(again.is_empty(), "poll acks implicitly, queue must be empty afterward");
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_and_reaches_every_known_recipient() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::file_backed(dir.path());
        queue.register_recipient("worker1").await;
        queue.register_recipient("worker2").await;
        queue
            .broadcast(msg("b1", "manager", BROADCAST_RECIPIENT))
            .await
            .unwrap();

        let w1 = queue.poll("worker1", Duration::from_millis(10)).await.unwrap();
        let w2 = queue.poll("worker2", Duration::from_millis(10)).await.unwrap();
        let mgr = queue.poll("manager", Duration::from_millis(10)).await.unwrap();
        assert_eq!(w1.len(), 1);
        assert_eq!(w2.len(), 1);
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn poll_with_no_messages_times_out_empty() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::file_backed(dir.path());
        let polled = queue.poll("ghost", Duration::from_millis(20)).await.unwrap();
        assert!(polled.is_empty());
    }
}
