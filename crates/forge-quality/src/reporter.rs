//! Failure notification shaping for `QualityGate.execute` results: a pure
//! function mapping a workflow's accumulated quality-gate failure count to a
//! small, closed set of recommended next actions.

use crate::QualityGateResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to do about a subtask whose quality gate has now failed
/// `failure_count` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DecisionRecommendation {
    Retry,
    Reassign,
    Escalate { escalate_to: String },
}

/// The payload handed to the manager/escalation channel when a gate fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePayload {
    pub sub_task_id: String,
    pub run_id: String,
    pub quality_gate_result: QualityGateResult,
    pub failed_gates: Vec<String>,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Decides whether and how loudly to notify the manager about a failed
/// quality gate run.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGateReporter;

impl QualityGateReporter {
    pub fn new() -> Self {
        Self
    }

    /// Notify iff the overall result failed.
    pub fn should_notify_manager(&self, result: &QualityGateResult) -> bool {
        !result.overall_passed
    }

    pub fn failed_gates(&self, result: &QualityGateResult) -> Vec<String> {
        let mut gates = Vec::new();
        if result.lint.executed && !result.lint.passed {
            gates.push("lint".to_string());
        }
        if result.test.executed && !result.test.passed {
            gates.push("test".to_string());
        }
        gates
    }

    pub fn build_failure_payload(
        &self,
        sub_task_id: impl Into<String>,
        run_id: impl Into<String>,
        result: QualityGateResult,
    ) -> FailurePayload {
        let failed_gates = self.failed_gates(&result);
        let mut errors = Vec::new();
        if !result.lint.passed {
            errors.push(result.lint.output.clone());
        }
        if !result.test.passed {
            errors.push(result.test.output.clone());
        }
        FailurePayload {
            sub_task_id: sub_task_id.into(),
            run_id: run_id.into(),
            quality_gate_result: result,
            failed_gates,
            errors,
            timestamp: Utc::now(),
        }
    }

    /// 1 failure → retry the same worker; 2 → reassign to a different
    /// worker; 3 or more → escalate to the quality authority (§4.8).
    pub fn decision_for_failure_count(&self, failure_count: u32) -> DecisionRecommendation {
        match failure_count {
            0 | 1 => DecisionRecommendation::Retry,
            2 => DecisionRecommendation::Reassign,
            _ => DecisionRecommendation::Escalate {
                escalate_to: "quality_authority".to_string(),
            },
        }
    }
}
