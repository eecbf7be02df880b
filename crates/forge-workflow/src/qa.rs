//! Quality-assurance phase logic (§4.8/§4.9): runs the lint→test pipeline
//! once per phase pass and turns the result into a `DecisionRecommendation`
//! based on how many times this workflow has failed QA so far. The decision
//! itself is pure (just reads the failure count the caller tracks); applying
//! it — redispatching development, reassigning a worker, or raising an
//! approval — is the `WorkflowEngine`'s job, since only it owns the ticket
//! store, bus and approval gate.

use forge_quality::{DecisionRecommendation, QualityGate, QualityGateConfig, QualityGateReporter, QualityGateResult};
use forge_types::Result;
use std::path::Path;

pub struct QaOutcome {
    pub result: QualityGateResult,
    pub decision: DecisionRecommendation,
}

/// Runs the quality gate for one pass and recommends what to do next.
/// `failure_count` is the number of times this workflow has already failed
/// QA (0 on the first attempt); the caller is responsible for incrementing
/// it across calls.
pub async fn run_quality_assurance(
    gate: &QualityGate,
    reporter: &QualityGateReporter,
    run_id: &str,
    workspace_dir: &Path,
    config: &QualityGateConfig,
    failure_count: u32,
) -> Result<QaOutcome> {
    let result = gate.execute(run_id, workspace_dir, config).await?;

    let decision = if result.overall_passed {
        DecisionRecommendation::Retry
    } else {
        reporter.decision_for_failure_count(failure_count + 1)
    };

    Ok(QaOutcome { result, decision })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_store::PersistentStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn passing_gate_recommends_retry_regardless_of_failure_count() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let gate = QualityGate::new(store);
        let reporter = QualityGateReporter::new();
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["true".to_string()]),
            test_command: Some(vec!["true".to_string()]),
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };

        let outcome = run_quality_assurance(&gate, &reporter, "wf-1", workspace.path(), &config, 2)
            .await
            .unwrap();
        assert!(outcome.result.overall_passed);
        assert_eq!(outcome.decision, DecisionRecommendation::Retry);
    }

    #[tokio::test]
    async fn third_failure_escalates_to_quality_authority() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let gate = QualityGate::new(store);
        let reporter = QualityGateReporter::new();
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["false".to_string()]),
            test_command: None,
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };

        let outcome = run_quality_assurance(&gate, &reporter, "wf-2", workspace.path(), &config, 2)
            .await
            .unwrap();
        assert!(!outcome.result.overall_passed);
        assert_eq!(
            outcome.decision,
            DecisionRecommendation::Escalate {
                escalate_to: "quality_authority".to_string()
            }
        );
    }
}
