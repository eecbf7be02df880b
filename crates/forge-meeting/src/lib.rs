//! Meeting synthesis: derives an agenda from instruction keywords, selects
//! participants by expertise, and drives a deterministic statement-collection
//! pass that always ends with the facilitator's summary and a `concluded`
//! agenda item.

mod agenda;

pub use agenda::derive_agenda;

use chrono::Utc;
use forge_store::PersistentStore;
use forge_types::{MeetingMinutes, Participant, Result, Statement};
use std::sync::Arc;

/// Fixed roster a meeting draws participants from. A real deployment would
/// source this from the agent registry; participant selection here is a pure
/// function of expertise, so a small static roster is sufficient.
pub fn default_roster() -> Vec<Participant> {
    vec![
        Participant {
            agent_id: "architect-1".to_string(),
            role: "architect".to_string(),
            worker_type: "design".to_string(),
            expertise: vec!["architecture".to_string(), "backend".to_string()],
        },
        Participant {
            agent_id: "pm-1".to_string(),
            role: "product_manager".to_string(),
            worker_type: "research".to_string(),
            expertise: vec!["product".to_string(), "requirements".to_string()],
        },
        Participant {
            agent_id: "security-1".to_string(),
            role: "security_engineer".to_string(),
            worker_type: "research".to_string(),
            expertise: vec!["security".to_string()],
        },
        Participant {
            agent_id: "qa-1".to_string(),
            role: "qa_lead".to_string(),
            worker_type: "test".to_string(),
            expertise: vec!["qa".to_string(), "test".to_string()],
        },
        Participant {
            agent_id: "devops-1".to_string(),
            role: "devops_engineer".to_string(),
            worker_type: "developer".to_string(),
            expertise: vec!["devops".to_string(), "infra".to_string()],
        },
        Participant {
            agent_id: "data-1".to_string(),
            role: "data_engineer".to_string(),
            worker_type: "developer".to_string(),
            expertise: vec!["data".to_string(), "backend".to_string()],
        },
    ]
}

pub struct MeetingCoordinator {
    store: Arc<PersistentStore>,
    roster: Vec<Participant>,
}

impl MeetingCoordinator {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            roster: default_roster(),
        }
    }

    pub fn with_roster(store: Arc<PersistentStore>, roster: Vec<Participant>) -> Self {
        Self { store, roster }
    }

    /// Synthesizes and persists a full `MeetingMinutes` for one workflow
    /// instruction (§4.6).
    pub async fn convene(
        &self,
        workflow_id: &str,
        instruction: &str,
        facilitator_agent_id: &str,
    ) -> Result<MeetingMinutes> {
        let meeting_id = forge_types::new_id();
        let mut agenda = derive_agenda(instruction);

        let mut participants = self.select_participants(&agenda);
        participants.push(Participant {
            agent_id: facilitator_agent_id.to_string(),
            role: "facilitator".to_string(),
            worker_type: "facilitator".to_string(),
            expertise: Vec::new(),
        });

        let started_at = Utc::now();
        let mut statements = Vec::new();

        for item in agenda.iter_mut() {
            for participant in &participants {
                if participant.agent_id == facilitator_agent_id {
                    continue;
                }
                statements.push(Statement {
                    participant_id: participant.agent_id.clone(),
                    participant_role: participant.role.clone(),
                    content: format!(
                        "{} assessment of \"{}\": {}",
                        participant.role, item.topic, item.description
                    ),
                    agenda_item_id: item.id.clone(),
                    timestamp: Utc::now(),
                });
            }

            let summary = format!(
                "Summary for \"{}\": {} participant inputs reviewed, proceeding as scoped.",
                item.topic,
                participants.len().saturating_sub(1)
            );
            statements.push(Statement {
                participant_id: facilitator_agent_id.to_string(),
                participant_role: "facilitator".to_string(),
                content: summary.clone(),
                agenda_item_id: item.id.clone(),
                timestamp: Utc::now(),
            });

            item.summary = Some(summary);
            item.status = forge_types::AgendaStatus::Concluded;
        }

        let minutes = MeetingMinutes {
            meeting_id: meeting_id.clone(),
            workflow_id: workflow_id.to_string(),
            facilitator: facilitator_agent_id.to_string(),
            agenda,
            participants,
            statements,
            decisions: Vec::new(),
            action_items: Vec::new(),
            started_at,
            ended_at: Some(Utc::now()),
        };

        self.store
            .save("runs", &format!("{workflow_id}/meetings/{meeting_id}"), &minutes)
            .await?;
        Ok(minutes)
    }

    pub async fn get(&self, workflow_id: &str, meeting_id: &str) -> Result<Option<MeetingMinutes>> {
        self.store
            .load("runs", &format!("{workflow_id}/meetings/{meeting_id}"))
            .await
    }

    /// Selects roster members whose expertise intersects any agenda item's
    /// required expertise. Order follows roster declaration order; a
    /// participant matching multiple items is included once.
    fn select_participants(&self, agenda: &[forge_types::AgendaItem]) -> Vec<Participant> {
        let required: std::collections::HashSet<&str> = agenda
            .iter()
            .flat_map(|item| agenda::required_expertise(&item.id).iter().copied())
            .collect();

        self.roster
            .iter()
            .filter(|p| p.expertise.iter().any(|e| required.contains(e.as_str())))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn coordinator() -> (MeetingCoordinator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        (MeetingCoordinator::new(store), dir)
    }

    #[tokio::test]
    async fn every_non_facilitator_participant_has_a_statement_per_item() {
        let (coordinator, _dir) = coordinator();
        let minutes = coordinator
            .convene("wf-1", "ユーザー認証機能を実装してください", "coo_pm")
            .await
            .unwrap();

        for item in &minutes.agenda {
            for participant in &minutes.participants {
                if participant.agent_id == minutes.facilitator {
                    continue;
                }
                let has_statement = minutes.statements.iter().any(|s| {
                    s.agenda_item_id == item.id && s.participant_id == participant.agent_id
                });
                assert!(has_statement, "missing statement for {}", participant.agent_id);
            }
        }
    }

    #[tokio::test]
    async fn every_agenda_item_concluded_with_facilitator_summary() {
        let (coordinator, _dir) = coordinator();
        let minutes = coordinator
            .convene("wf-2", "テストを強化してください", "coo_pm")
            .await
            .unwrap();

        for item in &minutes.agenda {
            assert_eq!(item.status, forge_types::AgendaStatus::Concluded);
            let facilitator_statement = minutes
                .statements
                .iter()
                .filter(|s| s.agenda_item_id == item.id && s.participant_id == "coo_pm")
                .last()
                .unwrap();
            assert_eq!(item.summary.as_deref(), Some(facilitator_statement.content.as_str()));
        }
    }

    #[tokio::test]
    async fn statement_timestamps_non_decreasing_within_item() {
        let (coordinator, _dir) = coordinator();
        let minutes = coordinator.convene("wf-3", "データベース設計", "coo_pm").await.unwrap();

        for item in &minutes.agenda {
            let mut last = None;
            for statement in minutes.statements.iter().filter(|s| s.agenda_item_id == item.id) {
                if let Some(prev) = last {
                    assert!(statement.timestamp >= prev);
                }
                last = Some(statement.timestamp);
            }
        }
    }

    #[tokio::test]
    async fn round_trip_is_deep_equal() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let coordinator = MeetingCoordinator::new(store.clone());
        let minutes = coordinator.convene("wf-4", "シンプルな変更", "coo_pm").await.unwrap();

        let reloaded_coordinator = MeetingCoordinator::new(store);
        let reloaded = reloaded_coordinator
            .get("wf-4", &minutes.meeting_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(minutes, reloaded);
    }
}
