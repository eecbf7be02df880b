use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

/// The artifact produced in the delivery phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: String,
    pub workflow_id: String,
    pub summary_report: String,
    pub changes: Vec<String>,
    pub test_results: TestResults,
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub review_history: Vec<String>,
}
