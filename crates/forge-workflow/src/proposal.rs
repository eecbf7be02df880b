//! Deterministic `Proposal` synthesis from a concluded `MeetingMinutes` into
//! the fixed three-task breakdown the development phase expects.

use forge_types::{MeetingMinutes, Proposal, Risk, RiskSeverity, TaskBreakdownItem, WorkerAssignment};

/// Builds the proposal artifact from a concluded meeting. The task breakdown
/// is fixed at three sequential roles (design, implement, test) — the
/// smallest shape that exercises the development phase's dependency
/// tracking and worker-type dispatch without requiring a real planning
/// model in this layer.
pub fn build_proposal(workflow_id: &str, meeting: &MeetingMinutes, version: u32) -> Proposal {
    let scope = meeting
        .agenda
        .iter()
        .map(|item| item.summary.clone().unwrap_or_else(|| item.description.clone()))
        .collect::<Vec<_>>()
        .join(" ");

    let task_breakdown = vec![
        TaskBreakdownItem {
            task_number: 1,
            title: "Design the solution".to_string(),
            worker_type: "designer".to_string(),
            estimated_effort: "1d".to_string(),
            dependencies: Vec::new(),
        },
        TaskBreakdownItem {
            task_number: 2,
            title: "Implement the solution".to_string(),
            worker_type: "developer".to_string(),
            estimated_effort: "2d".to_string(),
            dependencies: vec![1],
        },
        TaskBreakdownItem {
            task_number: 3,
            title: "Test the solution".to_string(),
            worker_type: "test".to_string(),
            estimated_effort: "1d".to_string(),
            dependencies: vec![2],
        },
    ];

    let worker_assignments = task_breakdown
        .iter()
        .map(|t| WorkerAssignment {
            task_number: t.task_number,
            agent_id: format!("{}-{workflow_id}", t.worker_type),
            worker_type: t.worker_type.clone(),
        })
        .collect();

    let risks = vec![Risk {
        severity: RiskSeverity::Medium,
        description: "Scope may expand once implementation begins.".to_string(),
        mitigation: "Quality gate and review stages catch drift before delivery.".to_string(),
    }];

    Proposal {
        id: forge_types::new_id(),
        workflow_id: workflow_id.to_string(),
        summary: format!("Proposal for: {}", meeting_title(meeting)),
        scope,
        task_breakdown,
        worker_assignments,
        risks,
        meeting_id: meeting.meeting_id.clone(),
        version,
    }
}

fn meeting_title(meeting: &MeetingMinutes) -> String {
    meeting
        .agenda
        .first()
        .map(|item| item.topic.clone())
        .unwrap_or_else(|| "the requested work".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forge_types::{AgendaItem, AgendaStatus};

    fn meeting() -> MeetingMinutes {
        MeetingMinutes {
            meeting_id: "m1".to_string(),
            workflow_id: "wf-1".to_string(),
            facilitator: "coo_pm".to_string(),
            agenda: vec![AgendaItem {
                id: "scope_definition".to_string(),
                topic: "Scope & Requirements".to_string(),
                description: "Clarify scope".to_string(),
                status: AgendaStatus::Concluded,
                summary: Some("Scope is clear".to_string()),
            }],
            participants: Vec::new(),
            statements: Vec::new(),
            decisions: Vec::new(),
            action_items: Vec::new(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        }
    }

    #[test]
    fn builds_three_sequential_tasks() {
        let proposal = build_proposal("wf-1", &meeting(), 1);
        assert_eq!(proposal.task_breakdown.len(), 3);
        assert_eq!(proposal.task_breakdown[1].dependencies, vec![1]);
        assert_eq!(proposal.worker_assignments.len(), 3);
    }
}
