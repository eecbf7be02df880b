use chrono::{DateTime, Utc};
use forge_store::PersistentStore;
use forge_types::Result;
use serde::{Deserialize, Serialize};

/// Derived bucket for a chat log entry, used for filtering/reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatLogCategory {
    TaskAssignment,
    ReviewFeedback,
    MeetingDiscussion,
    Escalation,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: ChatLogCategory,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStreamEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: ChatLogCategory,
    pub description: String,
    pub agent_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatLogFilter {
    pub date: Option<String>,
    pub agent_id: Option<String>,
    pub category: Option<ChatLogCategory>,
    pub workflow_id: Option<String>,
}

/// Per-day append file `chat-logs/YYYY-MM-DD.json` (§4.11). Each day's file
/// is a JSON array; appends read-modify-write the whole array (daily volume
/// at this system's scale is small enough that this is simpler than a JSONL
/// stream and still survives a crash mid-write via the store's atomic save).
pub struct ChatLogCapture<'a> {
    store: &'a PersistentStore,
}

impl<'a> ChatLogCapture<'a> {
    pub fn new(store: &'a PersistentStore) -> Self {
        Self { store }
    }

    fn day_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    /// Assigns `{id, timestamp}` and appends to today's file.
    pub async fn capture(
        &self,
        category: ChatLogCategory,
        from: &str,
        to: &str,
        content: &str,
        workflow_id: Option<String>,
    ) -> Result<ChatLogEntry> {
        let timestamp = Utc::now();
        let entry = ChatLogEntry {
            id: forge_types::new_id(),
            timestamp,
            category,
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            workflow_id,
        };
        let day = Self::day_key(timestamp);
        let mut day_entries: Vec<ChatLogEntry> = self
            .store
            .load("chat-logs", &day)
            .await?
            .unwrap_or_default();
        day_entries.push(entry.clone());
        self.store.save("chat-logs", &day, &day_entries).await?;
        Ok(entry)
    }

    pub async fn query(&self, filter: &ChatLogFilter) -> Result<Vec<ChatLogEntry>> {
        let days = self.relevant_days(filter).await?;
        let mut matched = Vec::new();
        for day in days {
            let entries: Vec<ChatLogEntry> =
                self.store.load("chat-logs", &day).await?.unwrap_or_default();
            for entry in entries {
                if Self::matches(&entry, filter) {
                    matched.push(entry);
                }
            }
        }
        Ok(matched)
    }

    /// Newest `limit` entries across all days, sorted newest-first.
    pub async fn activity_stream(&self, limit: usize) -> Result<Vec<ActivityStreamEntry>> {
        let mut days = self.store.list("chat-logs", "").await?;
        days.sort_by(|a, b| b.cmp(a));
        let mut out = Vec::new();
        for day in days {
            if out.len() >= limit {
                break;
            }
            let mut entries: Vec<ChatLogEntry> =
                self.store.load("chat-logs", &day).await?.unwrap_or_default();
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            for entry in entries {
                if out.len() >= limit {
                    break;
                }
                out.push(render_activity(entry));
            }
        }
        Ok(out)
    }

    async fn relevant_days(&self, filter: &ChatLogFilter) -> Result<Vec<String>> {
        if let Some(date) = &filter.date {
            return Ok(vec![date.clone()]);
        }
        self.store.list("chat-logs", "").await
    }

    fn matches(entry: &ChatLogEntry, filter: &ChatLogFilter) -> bool {
        if let Some(agent_id) = &filter.agent_id {
            if &entry.from != agent_id && &entry.to != agent_id {
                return false;
            }
        }
        if let Some(category) = filter.category {
            if entry.category != category {
                return false;
            }
        }
        if let Some(workflow_id) = &filter.workflow_id {
            if entry.workflow_id.as_deref() != Some(workflow_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Renders `"[<label>] <from> → <to>: <content, truncated to 80 chars>"`.
fn render_activity(entry: ChatLogEntry) -> ActivityStreamEntry {
    let label = match entry.category {
        ChatLogCategory::TaskAssignment => "task_assignment",
        ChatLogCategory::ReviewFeedback => "review_feedback",
        ChatLogCategory::MeetingDiscussion => "meeting_discussion",
        ChatLogCategory::Escalation => "escalation",
        ChatLogCategory::General => "general",
    };
    let truncated: String = entry.content.chars().take(80).collect();
    let description = format!("[{label}] {} → {}: {truncated}", entry.from, entry.to);
    ActivityStreamEntry {
        id: entry.id,
        timestamp: entry.timestamp,
        category: entry.category,
        description,
        agent_ids: vec![entry.from, entry.to],
        workflow_id: entry.workflow_id,
    }
}
