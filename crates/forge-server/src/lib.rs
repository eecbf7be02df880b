//! The `OrchestratorAPI` admission layer: a thin `axum` HTTP surface over
//! `forge-workflow`'s `WorkflowEngine` — one `Router::new().route(...)` per
//! operation bound to a small `async fn` handler, a cloneable `AppState`
//! threaded through via `State`, and fallible handlers that render every
//! error path through the uniform `{success, data?, error?, code?}` envelope
//! rather than a bare HTTP status.
//!
//! Responsibilities unique to this crate (not the engine it wraps): request
//! body-size limiting, AI-availability gating before `submitTask` admission,
//! and the pause/resume/emergency-stop agent-pool switch.

pub mod ai;

use ai::{AiAvailability, AiAvailabilityProbe, AlwaysAvailableProbe};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use forge_tickets::TicketStore;
use forge_types::{OrchestratorError, TicketMeta};
use forge_wire::{
    AckResponse, AiHealthResponse, ApproveWorkflowRequest, ConfigPatchRequest, ConfigValidationResponse,
    EscalateWorkflowRequest, Envelope, HealthResponse, ListWorkflowsQuery, RollbackWorkflowRequest,
    StartWorkflowRequest, StartWorkflowResponse, SubmitTaskRequest, SubmitTaskResponse, WireTaskStatus,
    WireWorkflowSummary,
};
use forge_workflow::{DecisionAction, WorkflowEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Default cap on request bodies (§6/§7 `BodyTooLarge`). 2 MiB comfortably
/// fits a proposal/deliverable artifact payload without admitting an
/// accidental multi-megabyte upload.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

type ErrJson = (StatusCode, Json<Envelope<()>>);

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub tickets: Arc<TicketStore>,
    pub config: forge_config::ConfigStore,
    pub ai: Arc<dyn AiAvailabilityProbe>,
    paused: Arc<AtomicBool>,
    build_id: String,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>, tickets: Arc<TicketStore>, config: forge_config::ConfigStore) -> Self {
        Self {
            engine,
            tickets,
            config,
            ai: Arc::new(AlwaysAvailableProbe),
            paused: Arc::new(AtomicBool::new(false)),
            build_id: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_ai_probe(mut self, probe: Arc<dyn AiAvailabilityProbe>) -> Self {
        self.ai = probe;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/{id}", get(get_task_status))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/workflows", post(start_workflow).get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/approve", post(approve_workflow))
        .route("/workflows/{id}/escalate", post(escalate_workflow))
        .route("/workflows/{id}/rollback", post(rollback_workflow))
        .route("/workflows/{id}/proposal", get(get_proposal))
        .route("/workflows/{id}/deliverable", get(get_deliverable))
        .route("/workflows/{id}/meetings", get(get_meetings))
        .route("/workflows/{id}/progress", get(get_progress))
        .route("/workflows/{id}/quality", get(get_quality))
        .route("/config", get(get_config).patch(patch_config))
        .route("/config/validate", post(validate_config))
        .route("/agents/pause", post(pause_agents))
        .route("/agents/resume", post(resume_agents))
        .route("/agents/emergency-stop", post(emergency_stop))
        .route("/health", get(health))
        .route("/health/ai", get(health_ai))
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT_BYTES))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn err_response(error: OrchestratorError) -> ErrJson {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::warn!(code = error.code(), %status, %error, "request failed");
    (status, Json(Envelope::err(error.to_string(), error.code())))
}

// --- submitTask / getTaskStatus / cancelTask --------------------------------

async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<Envelope<SubmitTaskResponse>>, ErrJson> {
    if state.is_paused() {
        return Err(err_response(OrchestratorError::AiUnavailable));
    }
    let availability: AiAvailability = state.ai.check().await;
    if !availability.any_available() {
        let hint = state.ai.setup_hint().unwrap_or_default();
        let message = if hint.is_empty() {
            "no AI backend is available".to_string()
        } else {
            format!("no AI backend is available: {hint}")
        };
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::err(message, "AI_UNAVAILABLE"))));
    }

    let meta = TicketMeta {
        priority: req.priority,
        tags: req.tags,
        deadline: req.deadline,
    };
    let task_id = state
        .engine
        .start_workflow_with_meta(&req.project_id, &req.instruction, meta)
        .await
        .map_err(err_response)?;
    Ok(Json(Envelope::ok(SubmitTaskResponse { task_id })))
}

async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<WireTaskStatus>>, ErrJson> {
    let workflow = state.engine.get_workflow(&id).await.map_err(err_response)?;
    let ticket_status = match state.tickets.get(&id).await {
        Ok(ticket) => ticket.status(),
        Err(_) => forge_types::TicketStatus::Pending,
    };
    Ok(Json(Envelope::ok(WireTaskStatus {
        task_id: id,
        status: ticket_status,
        workflow_id: Some(workflow.workflow_id),
    })))
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope<AckResponse>>, ErrJson> {
    state.engine.cancel_task(&id).await.map_err(err_response)?;
    Ok(Json(Envelope::ok(AckResponse::ok())))
}

// --- startWorkflow / listWorkflows / getWorkflow ----------------------------

async fn start_workflow(
    State(state): State<AppState>,
    Json(req): Json<StartWorkflowRequest>,
) -> Result<Json<Envelope<StartWorkflowResponse>>, ErrJson> {
    let workflow_id = state
        .engine
        .start_workflow(&req.project_id, &req.instruction)
        .await
        .map_err(err_response)?;
    Ok(Json(Envelope::ok(StartWorkflowResponse { workflow_id })))
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<Envelope<Vec<WireWorkflowSummary>>>, ErrJson> {
    let workflows = state.engine.list_workflows(query.status).await.map_err(err_response)?;
    let summaries = workflows
        .into_iter()
        .map(|w| WireWorkflowSummary {
            workflow_id: w.workflow_id,
            project_id: w.project_id,
            phase: w.phase,
            status: w.status,
            created_at: w.created_at,
            updated_at: w.updated_at,
        })
        .collect();
    Ok(Json(Envelope::ok(summaries)))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<forge_types::Workflow>>, ErrJson> {
    let workflow = state.engine.get_workflow(&id).await.map_err(err_response)?;
    Ok(Json(Envelope::ok(workflow)))
}

// --- approveWorkflow / escalateWorkflow / rollbackWorkflow ------------------

async fn approve_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveWorkflowRequest>,
) -> Result<Json<Envelope<AckResponse>>, ErrJson> {
    let action = match req.action {
        forge_wire::ApprovalAction::Approve => DecisionAction::Approve,
        forge_wire::ApprovalAction::RequestRevision => DecisionAction::RequestRevision,
        forge_wire::ApprovalAction::Reject => DecisionAction::Reject,
    };
    state
        .engine
        .submit_approval(&id, action, req.feedback)
        .await
        .map_err(err_response)?;
    Ok(Json(Envelope::ok(AckResponse::ok())))
}

async fn escalate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EscalateWorkflowRequest>,
) -> Result<Json<Envelope<AckResponse>>, ErrJson> {
    state
        .engine
        .handle_escalation(&id, req.action, &req.reason)
        .await
        .map_err(err_response)?;
    Ok(Json(Envelope::ok(AckResponse::ok())))
}

async fn rollback_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RollbackWorkflowRequest>,
) -> Result<Json<Envelope<AckResponse>>, ErrJson> {
    state
        .engine
        .rollback_to_phase(&id, req.target_phase)
        .await
        .map_err(err_response)?;
    Ok(Json(Envelope::ok(AckResponse::ok())))
}

// --- artifacts and progress --------------------------------------------------

async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<forge_types::Proposal>>, ErrJson> {
    let proposal = state.engine.get_proposal(&id).await.map_err(err_response)?;
    Ok(Json(match proposal {
        Some(p) => Envelope::ok(p),
        None => Envelope { success: true, data: None, error: None, code: None },
    }))
}

async fn get_deliverable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<forge_types::Deliverable>>, ErrJson> {
    let deliverable = state.engine.get_deliverable(&id).await.map_err(err_response)?;
    Ok(Json(match deliverable {
        Some(d) => Envelope::ok(d),
        None => Envelope { success: true, data: None, error: None, code: None },
    }))
}

async fn get_meetings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Vec<forge_types::MeetingMinutes>>>, ErrJson> {
    let meetings = state.engine.get_meetings(&id).await.map_err(err_response)?;
    Ok(Json(Envelope::ok(meetings)))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<forge_wire::WireProgress>>, ErrJson> {
    let progress = state.engine.get_progress(&id).await.map_err(err_response)?;
    Ok(Json(match progress {
        Some(p) => Envelope::ok(p),
        None => Envelope { success: true, data: None, error: None, code: None },
    }))
}

async fn get_quality(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<forge_quality::QualityGateResult>>, ErrJson> {
    let quality = state.engine.get_quality(&id).await.map_err(err_response)?;
    Ok(Json(match quality {
        Some(q) => Envelope::ok(q),
        None => Envelope { success: true, data: None, error: None, code: None },
    }))
}

// --- config ------------------------------------------------------------------

async fn get_config(State(state): State<AppState>) -> Json<Envelope<forge_config::EffectiveConfig>> {
    Json(Envelope::ok(state.config.effective().await))
}

async fn patch_config(
    State(state): State<AppState>,
    Json(req): Json<ConfigPatchRequest>,
) -> Result<Json<Envelope<forge_config::EffectiveConfig>>, (StatusCode, Json<ConfigValidationResponse>)> {
    let report = state.config.update_persisted(req.patch).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ConfigValidationResponse { valid: false, errors: vec![e.to_string()], warnings: vec![] }),
        )
    })?;
    if !report.errors.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ConfigValidationResponse { valid: false, errors: report.errors, warnings: report.warnings }),
        ));
    }
    Ok(Json(Envelope::ok(state.config.effective().await)))
}

async fn validate_config(
    State(state): State<AppState>,
    Json(req): Json<ConfigPatchRequest>,
) -> Json<ConfigValidationResponse> {
    let report = state.config.validate(&req.patch).await;
    Json(ConfigValidationResponse {
        valid: report.errors.is_empty(),
        errors: report.errors,
        warnings: report.warnings,
    })
}

// --- agent pool control -------------------------------------------------------

async fn pause_agents(State(state): State<AppState>) -> Json<Envelope<AckResponse>> {
    state.paused.store(true, Ordering::SeqCst);
    Json(Envelope::ok(AckResponse::ok()))
}

async fn resume_agents(State(state): State<AppState>) -> Json<Envelope<AckResponse>> {
    state.paused.store(false, Ordering::SeqCst);
    Json(Envelope::ok(AckResponse::ok()))
}

async fn emergency_stop(State(state): State<AppState>) -> Result<Json<Envelope<AckResponse>>, ErrJson> {
    state.paused.store(true, Ordering::SeqCst);
    state.engine.emergency_stop().await.map_err(err_response)?;
    Ok(Json(Envelope::ok(AckResponse::ok())))
}

// --- health --------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Envelope<HealthResponse>> {
    Json(Envelope::ok(HealthResponse { healthy: true, build_id: state.build_id.clone() }))
}

async fn health_ai(State(state): State<AppState>) -> Json<Envelope<AiHealthResponse>> {
    let availability = state.ai.check().await;
    Json(Envelope::ok(AiHealthResponse {
        available: availability.any_available(),
        local_llm_available: availability.local_llm_available,
        coding_agent_available: availability.coding_agent_available,
        setup_hint: if availability.any_available() { None } else { state.ai.setup_hint() },
    }))
}
