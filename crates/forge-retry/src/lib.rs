//! Bounded exponential-backoff retry with keyword-based error classification
//! and escalation: a `(delay * multiplier).min(max_delay_ms)` doubling
//! sequence bounds the wait between attempts, and a lowercase-keyword
//! classifier sorts a raw error string into a closed category set.

mod classify;
mod policy;

pub use classify::{classify_error, ErrorCategory};
pub use policy::RetryPolicy;

use async_trait::async_trait;
use chrono::Utc;
use forge_store::PersistentStore;
use forge_types::{OrchestratorError, PausedProgress, PausedState, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// `{runId, agentId}` plus a short operation label, threaded through for
/// logging and escalation payloads.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub run_id: String,
    pub agent_id: String,
    pub operation: String,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    pub attempts: u32,
    pub error_history: Vec<String>,
}

/// `{runId, agentId, category, error, attempts, reason, timestamp}` handed to
/// `EscalationSink::on_escalation` when a retry budget is exhausted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPayload {
    pub run_id: String,
    pub agent_id: String,
    pub category: ErrorCategory,
    pub error: String,
    pub attempts: u32,
    pub reason: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// The action `handleWorkerFailure` recommends once a retry budget is spent,
/// derived from the error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Reassign,
    Escalate,
    ManualReview,
}

/// Maps a terminal error category to a recommended remediation:
/// connection/timeout/tool_call are usually transient enough to retry on a
/// different worker, git/container/unknown need a human look, and
/// validation failures escalate outright.
pub fn recommended_action(category: ErrorCategory) -> RecommendedAction {
    match category {
        ErrorCategory::AiConnection | ErrorCategory::Timeout | ErrorCategory::ToolCall => {
            RecommendedAction::Reassign
        }
        ErrorCategory::Git | ErrorCategory::Container | ErrorCategory::Unknown => {
            RecommendedAction::ManualReview
        }
        ErrorCategory::Validation => RecommendedAction::Escalate,
    }
}

/// Pluggable escalation hook: the retry engine never assumes a sink is
/// present, and a no-op default is provided for callers that only want
/// logging.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn on_escalation(&self, payload: EscalationPayload);
}

pub struct NoopEscalationSink;

#[async_trait]
impl EscalationSink for NoopEscalationSink {
    async fn on_escalation(&self, _payload: EscalationPayload) {}
}

/// Runs `op` under `policy`, retrying on `Err` until `maxRetries` is
/// exhausted. Delay before attempt *n* (1-indexed retry count) is
/// `min(initialDelayMs * multiplier^n, maxDelayMs)`, so the default policy
/// (`max_retries=3, initial=1000, multiplier=2, max_delay=4000`) produces the
/// sequence 1s, 2s, 4s. On exhaustion, classifies the terminal error, appends
/// a structured line to `runs/<runId>/errors.log`, and invokes `sink`.
pub async fn with_retry<T, F, Fut>(
    store: &PersistentStore,
    policy: &RetryPolicy,
    ctx: &RetryContext,
    sink: &dyn EscalationSink,
    mut op: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let mut error_history = Vec::new();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(result) => {
                return Ok(RetryOutcome {
                    success: true,
                    result: Some(result),
                    error: None,
                    attempts,
                    error_history,
                });
            }
            Err(error) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    agent_id = %ctx.agent_id,
                    operation = %ctx.operation,
                    attempt = attempts,
                    error = %error,
                    "operation attempt failed"
                );
                error_history.push(error.clone());

                if attempts > policy.max_retries {
                    let category = classify::classify_error(&error);
                    log_exhaustion(store, ctx, &category, &error).await?;
                    sink.on_escalation(EscalationPayload {
                        run_id: ctx.run_id.clone(),
                        agent_id: ctx.agent_id.clone(),
                        category,
                        error: error.clone(),
                        attempts,
                        reason: format!("retry budget exhausted after {attempts} attempts"),
                        timestamp: Utc::now(),
                    })
                    .await;
                    return Ok(RetryOutcome {
                        success: false,
                        result: None,
                        error: Some(error),
                        attempts,
                        error_history,
                    });
                }

                let delay = policy.delay_for_attempt(attempts - 1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn log_exhaustion(
    store: &PersistentStore,
    ctx: &RetryContext,
    category: &ErrorCategory,
    error: &str,
) -> Result<()> {
    let line = format!(
        "[{}] [{}_ERROR] [RECOVERABLE] {}: {}",
        Utc::now().to_rfc3339(),
        category.as_str().to_uppercase(),
        ctx.operation,
        error
    );
    store.append_log("runs", &format!("{}/errors", ctx.run_id), &line).await
}

/// Higher-level wrapper: on exhaustion, marks the owning ticket `failed` via
/// `ticket_sink` and notifies the manager via `notify_sink`. The two
/// side-effects are independent — failure of one must not prevent the other
/// (§4.4), so both are attempted and only the first error (if any) is
/// surfaced.
pub async fn handle_worker_failure<T, F, Fut>(
    store: &PersistentStore,
    policy: &RetryPolicy,
    ctx: &RetryContext,
    escalation_sink: &dyn EscalationSink,
    ticket_id: &str,
    ticket_sink: &dyn TicketFailureSink,
    notify_sink: &dyn WorkerFailureNotifier,
    op: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let outcome = with_retry(store, policy, ctx, escalation_sink, op).await?;
    if !outcome.success {
        let error = outcome.error.clone().unwrap_or_default();
        let category = classify::classify_error(&error);
        let action = recommended_action(category);

        let mark_result = ticket_sink.mark_failed(ticket_id).await;
        let notify_result = notify_sink
            .notify_manager(ticket_id, category, action, &error)
            .await;

        mark_result?;
        notify_result?;
    }
    Ok(outcome)
}

#[async_trait]
pub trait TicketFailureSink: Send + Sync {
    async fn mark_failed(&self, ticket_id: &str) -> Result<()>;
}

#[async_trait]
pub trait WorkerFailureNotifier: Send + Sync {
    async fn notify_manager(
        &self,
        ticket_id: &str,
        category: ErrorCategory,
        action: RecommendedAction,
        error: &str,
    ) -> Result<()>;
}

/// Writes a `PausedState` snapshot and logs one `AI_UNAVAILABLE` error line
/// (§4.4 `handleAIUnavailable`). Guarantees `load(path) == returned value`
/// because the returned struct is exactly what was serialized.
pub async fn handle_ai_unavailable(
    store: &PersistentStore,
    run_id: &str,
    progress: PausedProgress,
    reason: impl Into<String>,
) -> Result<PausedState> {
    let reason = reason.into();
    let state = PausedState {
        run_id: run_id.to_string(),
        paused_at: Utc::now(),
        task_status: "paused".to_string(),
        progress,
        reason: reason.clone(),
        recovery_instructions:
            "Resume once an AI backend (local LLM or registered coding agent) becomes available."
                .to_string(),
    };
    store
        .save("runs", &format!("{run_id}/paused-state"), &state)
        .await?;
    let line = format!(
        "[{}] [AI_UNAVAILABLE_ERROR] [RECOVERABLE] {}",
        Utc::now().to_rfc3339(),
        reason
    );
    store.append_log("runs", &format!("{run_id}/errors"), &line).await?;
    Ok(state)
}

/// Convenience conversion for callers that want an `OrchestratorError` rather
/// than the raw string history on a failed `RetryOutcome`.
pub fn into_retry_exhausted(category: ErrorCategory) -> OrchestratorError {
    OrchestratorError::RetryExhausted {
        category: category.as_str().to_string(),
    }
}
