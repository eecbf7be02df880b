use crate::StageResult;

/// Observable hooks fired around each quality-gate stage: every method has a
/// no-op default so the core never needs to check whether a sink is
/// installed, and sinks only implement the events they care about.
#[async_trait::async_trait]
pub trait QualityGateEventSink: Send + Sync {
    async fn lint_start(&self, _run_id: &str) {}
    async fn lint_complete(&self, _run_id: &str, _result: &StageResult) {}
    async fn test_start(&self, _run_id: &str) {}
    async fn test_complete(&self, _run_id: &str, _result: &StageResult) {}
    async fn error(&self, _run_id: &str, _message: &str) {}
}

/// Default sink: observes nothing.
pub struct NoopQualityGateEventSink;

#[async_trait::async_trait]
impl QualityGateEventSink for NoopQualityGateEventSink {}
