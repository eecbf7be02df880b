//! Delivery-phase artifact building (§4.9 *delivery* phase contract).
//! Grounded in `proposal.rs`'s deterministic-synthesis style: the delivery
//! phase has no real authoring model either, so `build_deliverable` derives
//! its report straight from the development state and quality-gate result
//! already on hand.

use forge_quality::QualityGateResult;
use forge_types::{Deliverable, TestResults};
use crate::development::DevelopmentState;

/// Builds the deliverable artifact from the settled development state and
/// the final quality-gate result. `test.output` is heuristically summarized
/// into pass/fail counts the same way `forge_quality` counts errors and
/// warnings — this layer has no structured test-runner output to parse.
pub fn build_deliverable(workflow_id: &str, development: &DevelopmentState, quality: &QualityGateResult) -> Deliverable {
    let changes = development
        .tasks
        .iter()
        .map(|t| format!("{}: {:?}", t.title, t.status))
        .collect();

    let test_results = TestResults {
        total: development.tasks.len() as u32,
        passed: development
            .tasks
            .iter()
            .filter(|t| matches!(t.status, forge_wire::SubtaskStatus::Completed))
            .count() as u32,
        failed: development
            .tasks
            .iter()
            .filter(|t| matches!(t.status, forge_wire::SubtaskStatus::Failed))
            .count() as u32,
        skipped: development
            .tasks
            .iter()
            .filter(|t| matches!(t.status, forge_wire::SubtaskStatus::Skipped))
            .count() as u32,
        coverage: None,
    };

    let summary_report = format!(
        "Development completed {}/{} tasks. Quality gate {}.",
        test_results.passed,
        test_results.total,
        if quality.overall_passed { "passed" } else { "did not pass" }
    );

    Deliverable {
        id: forge_types::new_id(),
        workflow_id: workflow_id.to_string(),
        summary_report,
        changes,
        test_results,
        artifacts: Vec::new(),
        review_history: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::development::TaskProgress;
    use forge_quality::StageResult;
    use forge_types::WorkerType;

    fn quality_result(passed: bool) -> QualityGateResult {
        QualityGateResult {
            run_id: "wf-1".into(),
            lint: StageResult {
                executed: true,
                passed,
                output: String::new(),
                duration_ms: 1,
                skip_reason: None,
            },
            test: StageResult {
                executed: true,
                passed,
                output: String::new(),
                duration_ms: 1,
                skip_reason: None,
            },
            overall_passed: passed,
            error_count: 0,
            warning_count: 0,
        }
    }

    #[test]
    fn summarizes_completed_task_counts() {
        let development = DevelopmentState {
            workflow_id: "wf-1".into(),
            tasks: vec![TaskProgress {
                task_number: 1,
                child_ticket_id: "c1".into(),
                title: "Design".into(),
                worker_type: WorkerType::Designer,
                status: forge_wire::SubtaskStatus::Completed,
                attempts: 1,
                error: None,
            }],
        };
        let deliverable = build_deliverable("wf-1", &development, &quality_result(true));
        assert_eq!(deliverable.test_results.passed, 1);
        assert_eq!(deliverable.test_results.total, 1);
        assert!(deliverable.summary_report.contains("passed"));
    }
}
