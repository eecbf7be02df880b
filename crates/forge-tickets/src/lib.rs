//! Parent/child/grandchild ticket tree: small, independently testable
//! transition and query functions over tickets persisted one-document-per-id
//! under `tickets/<id>.json` through `forge-store`, with a creation-ordered
//! index document so listing doesn't require a directory scan in creation
//! order.

use chrono::Utc;
use forge_store::PersistentStore;
use forge_types::{
    ChildTicket, GrandchildTicket, OrchestratorError, ParentTicket, Result, TicketMeta,
    TicketStatus, WorkerType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

const KIND: &str = "tickets";
const INDEX_KEY: &str = "_index";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TicketIndex {
    ids: Vec<String>,
}

/// Discriminates which tier a stored document belongs to, so `get`/`list`
/// can return a uniform view without three separate lookup calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Ticket {
    Parent(ParentTicket),
    Child(ChildTicket),
    Grandchild(GrandchildTicket),
}

impl Ticket {
    pub fn id(&self) -> &str {
        match self {
            Ticket::Parent(t) => &t.id,
            Ticket::Child(t) => &t.id,
            Ticket::Grandchild(t) => &t.id,
        }
    }

    pub fn status(&self) -> TicketStatus {
        match self {
            Ticket::Parent(t) => t.status,
            Ticket::Child(t) => t.status,
            Ticket::Grandchild(t) => t.status,
        }
    }
}

/// Optional filter for `list` (§4.7's `list(filter)`).
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub project_id: Option<String>,
    pub status: Option<TicketStatus>,
}

/// CRUD over the three-tier ticket tree, serializing index updates through
/// a single lock (one store-level document, `tickets/_index.json`) so
/// concurrent `createParent`/`addChild`/`addGrandchild` calls don't race on
/// the creation-order list.
pub struct TicketStore {
    store: Arc<PersistentStore>,
    index_lock: Mutex<()>,
}

impl TicketStore {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            index_lock: Mutex::new(()),
        }
    }

    pub async fn create_parent(
        &self,
        project_id: impl Into<String>,
        instruction: impl Into<String>,
        meta: TicketMeta,
    ) -> Result<ParentTicket> {
        let now = Utc::now();
        let parent = ParentTicket {
            id: forge_types::new_id(),
            project_id: project_id.into(),
            instruction: instruction.into(),
            meta,
            status: TicketStatus::Pending,
            children: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.save(KIND, &parent.id, &Ticket::Parent(parent.clone())).await?;
        self.append_index(&parent.id).await?;
        Ok(parent)
    }

    pub async fn add_child(
        &self,
        parent_id: &str,
        worker_type: WorkerType,
        description: impl Into<String>,
    ) -> Result<ChildTicket> {
        let mut parent = self.get_parent(parent_id).await?;
        let now = Utc::now();
        let child = ChildTicket {
            id: forge_types::new_id(),
            parent_id: parent_id.to_string(),
            worker_type,
            description: description.into(),
            status: TicketStatus::Pending,
            grandchildren: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.save(KIND, &child.id, &Ticket::Child(child.clone())).await?;
        self.append_index(&child.id).await?;

        parent.children.push(child.id.clone());
        parent.updated_at = now;
        self.store.save(KIND, &parent.id, &Ticket::Parent(parent)).await?;
        Ok(child)
    }

    pub async fn add_grandchild(
        &self,
        child_id: &str,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Result<GrandchildTicket> {
        let mut child = self.get_child(child_id).await?;
        let now = Utc::now();
        let grandchild = GrandchildTicket {
            id: forge_types::new_id(),
            child_id: child_id.to_string(),
            description: description.into(),
            acceptance_criteria,
            artifacts: Vec::new(),
            git_branch: None,
            assignee: None,
            status: TicketStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store
            .save(KIND, &grandchild.id, &Ticket::Grandchild(grandchild.clone()))
            .await?;
        self.append_index(&grandchild.id).await?;

        child.grandchildren.push(grandchild.id.clone());
        child.updated_at = now;
        self.store.save(KIND, &child.id, &Ticket::Child(child)).await?;
        Ok(grandchild)
    }

    /// Validates `(current, new_status)` against the transition table
    /// (§4.7) before writing. A parent additionally cannot move to
    /// `completed` unless every child `counts_as_done()` (§3 invariant).
    pub async fn update_status(&self, ticket_id: &str, new_status: TicketStatus) -> Result<Ticket> {
        let mut ticket = self.get(ticket_id).await?;
        let current = ticket.status();
        if !current.can_transition_to(new_status) {
            return Err(OrchestratorError::InvalidTicketTransition {
                from: format!("{current:?}"),
                to: format!("{new_status:?}"),
            });
        }

        if new_status == TicketStatus::Completed {
            if let Ticket::Parent(parent) = &ticket {
                for child_id in &parent.children {
                    let child = self.get_child(child_id).await?;
                    if !child.status.counts_as_done() {
                        return Err(OrchestratorError::InvalidTicketTransition {
                            from: format!("{current:?}"),
                            to: format!("{new_status:?}"),
                        });
                    }
                }
            }
        }

        let now = Utc::now();
        match &mut ticket {
            Ticket::Parent(t) => {
                t.status = new_status;
                t.updated_at = now;
            }
            Ticket::Child(t) => {
                t.status = new_status;
                t.updated_at = now;
            }
            Ticket::Grandchild(t) => {
                t.status = new_status;
                t.updated_at = now;
            }
        }
        self.store.save(KIND, ticket_id, &ticket).await?;
        Ok(ticket)
    }

    /// Forces a status downgrade from `completed` and resets descendants to
    /// `pending`, per the §3 invariant that a completed→non-completed
    /// rollback must also reset what it owns. Bypasses the forward
    /// transition table (this is an explicit administrative rollback, not a
    /// normal lifecycle step).
    pub async fn rollback_status(&self, ticket_id: &str, to_status: TicketStatus) -> Result<Ticket> {
        let mut ticket = self.get(ticket_id).await?;
        let now = Utc::now();

        let child_ids: Vec<String> = match &ticket {
            Ticket::Parent(t) => t.children.clone(),
            Ticket::Child(t) => t.grandchildren.clone(),
            Ticket::Grandchild(_) => Vec::new(),
        };
        for descendant_id in child_ids {
            let mut descendant = self.get(&descendant_id).await?;
            match &mut descendant {
                Ticket::Parent(t) => {
                    t.status = TicketStatus::Pending;
                    t.updated_at = now;
                }
                Ticket::Child(t) => {
                    t.status = TicketStatus::Pending;
                    t.updated_at = now;
                }
                Ticket::Grandchild(t) => {
                    t.status = TicketStatus::Pending;
                    t.updated_at = now;
                }
            }
            self.store.save(KIND, &descendant_id, &descendant).await?;
        }

        match &mut ticket {
            Ticket::Parent(t) => {
                t.status = to_status;
                t.updated_at = now;
            }
            Ticket::Child(t) => {
                t.status = to_status;
                t.updated_at = now;
            }
            Ticket::Grandchild(t) => {
                t.status = to_status;
                t.updated_at = now;
            }
        }
        self.store.save(KIND, ticket_id, &ticket).await?;
        Ok(ticket)
    }

    pub async fn get(&self, ticket_id: &str) -> Result<Ticket> {
        self.store
            .load(KIND, ticket_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("ticket {ticket_id}")))
    }

    pub async fn get_parent(&self, ticket_id: &str) -> Result<ParentTicket> {
        match self.get(ticket_id).await? {
            Ticket::Parent(t) => Ok(t),
            other => Err(OrchestratorError::NotFound(format!(
                "{} is not a parent ticket",
                other.id()
            ))),
        }
    }

    pub async fn get_child(&self, ticket_id: &str) -> Result<ChildTicket> {
        match self.get(ticket_id).await? {
            Ticket::Child(t) => Ok(t),
            other => Err(OrchestratorError::NotFound(format!(
                "{} is not a child ticket",
                other.id()
            ))),
        }
    }

    pub async fn get_grandchild(&self, ticket_id: &str) -> Result<GrandchildTicket> {
        match self.get(ticket_id).await? {
            Ticket::Grandchild(t) => Ok(t),
            other => Err(OrchestratorError::NotFound(format!(
                "{} is not a grandchild ticket",
                other.id()
            ))),
        }
    }

    /// Lists tickets in creation order, optionally narrowed by project or
    /// status. `project_id` only narrows parent tickets directly; children
    /// and grandchildren are matched by status alone since they don't carry
    /// a project id of their own.
    pub async fn list(&self, filter: TicketFilter) -> Result<Vec<Ticket>> {
        let index: TicketIndex = self.store.load(KIND, INDEX_KEY).await?.unwrap_or_default();
        let mut out = Vec::new();
        for id in index.ids {
            let Some(ticket) = self.store.load::<Ticket>(KIND, &id).await? else {
                continue;
            };
            if let Some(status) = filter.status {
                if ticket.status() != status {
                    continue;
                }
            }
            if let Some(project_id) = &filter.project_id {
                if let Ticket::Parent(parent) = &ticket {
                    if &parent.project_id != project_id {
                        continue;
                    }
                }
            }
            out.push(ticket);
        }
        Ok(out)
    }

    async fn append_index(&self, id: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index: TicketIndex = self.store.load(KIND, INDEX_KEY).await?.unwrap_or_default();
        index.ids.push(id.to_string());
        self.store.save(KIND, INDEX_KEY, &index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (TicketStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        (TicketStore::new(store), dir)
    }

    #[tokio::test]
    async fn create_parent_then_add_child_links_both_ways() {
        let (tickets, _dir) = store().await;
        let parent = tickets
            .create_parent("proj-1", "build the thing", TicketMeta::default())
            .await
            .unwrap();
        let child = tickets
            .add_child(&parent.id, WorkerType::Developer, "implement core logic")
            .await
            .unwrap();

        let reloaded = tickets.get_parent(&parent.id).await.unwrap();
        assert_eq!(reloaded.children, vec![child.id.clone()]);
        assert_eq!(child.parent_id, parent.id);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let (tickets, _dir) = store().await;
        let parent = tickets
            .create_parent("proj-1", "x", TicketMeta::default())
            .await
            .unwrap();
        let err = tickets
            .update_status(&parent.id, TicketStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTicketTransition { .. }));
    }

    #[tokio::test]
    async fn parent_cannot_complete_until_children_done() {
        let (tickets, _dir) = store().await;
        let parent = tickets
            .create_parent("proj-1", "x", TicketMeta::default())
            .await
            .unwrap();
        let child = tickets
            .add_child(&parent.id, WorkerType::Developer, "do work")
            .await
            .unwrap();
        tickets
            .update_status(&parent.id, TicketStatus::InProgress)
            .await
            .unwrap();

        let err = tickets
            .update_status(&parent.id, TicketStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTicketTransition { .. }));

        tickets.update_status(&child.id, TicketStatus::InProgress).await.unwrap();
        tickets.update_status(&child.id, TicketStatus::Completed).await.unwrap();
        tickets.update_status(&parent.id, TicketStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn pr_created_child_counts_as_done_for_parent_completion() {
        let (tickets, _dir) = store().await;
        let parent = tickets
            .create_parent("proj-1", "x", TicketMeta::default())
            .await
            .unwrap();
        let child = tickets
            .add_child(&parent.id, WorkerType::Developer, "do work")
            .await
            .unwrap();
        tickets.update_status(&child.id, TicketStatus::InProgress).await.unwrap();
        tickets.update_status(&child.id, TicketStatus::Completed).await.unwrap();
        tickets.update_status(&child.id, TicketStatus::PrCreated).await.unwrap();
        tickets
            .update_status(&parent.id, TicketStatus::InProgress)
            .await
            .unwrap();
        tickets.update_status(&parent.id, TicketStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn rollback_resets_descendants_to_pending() {
        let (tickets, _dir) = store().await;
        let parent = tickets
            .create_parent("proj-1", "x", TicketMeta::default())
            .await
            .unwrap();
        let child = tickets
            .add_child(&parent.id, WorkerType::Developer, "do work")
            .await
            .unwrap();
        tickets.update_status(&child.id, TicketStatus::InProgress).await.unwrap();
        tickets.update_status(&child.id, TicketStatus::Completed).await.unwrap();
        tickets.update_status(&parent.id, TicketStatus::InProgress).await.unwrap();
        tickets.update_status(&parent.id, TicketStatus::Completed).await.unwrap();

        tickets
            .rollback_status(&parent.id, TicketStatus::InProgress)
            .await
            .unwrap();
        let reloaded_child = tickets.get_child(&child.id).await.unwrap();
        assert_eq!(reloaded_child.status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn list_filters_by_project_and_status() {
        let (tickets, _dir) = store().await;
        tickets.create_parent("proj-a", "a", TicketMeta::default()).await.unwrap();
        tickets.create_parent("proj-b", "b", TicketMeta::default()).await.unwrap();

        let filtered = tickets
            .list(TicketFilter {
                project_id: Some("proj-a".to_string()),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
