use thiserror::Error;

/// The crate-wide error taxonomy. Every component returns this type (or
/// wraps it) so the HTTP layer can map a single enum to wire error codes
/// without per-crate translation tables.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("agent bus validation error: {0}")]
    BusValidation(String),

    #[error("retry exhausted: category={category}")]
    RetryExhausted { category: String },

    #[error("approval gate already waiting for workflow {workflow_id}")]
    ApprovalAlreadyWaiting { workflow_id: String },

    #[error("approval gate cancelled: {reason}")]
    ApprovalCancelled { reason: String },

    #[error("invalid ticket transition: {from} -> {to}")]
    InvalidTicketTransition { from: String, to: String },

    #[error("workflow not found: {id}")]
    WorkflowNotFound { id: String },

    #[error("invalid workflow state: {detail}")]
    InvalidWorkflowState { detail: String },

    #[error("workflow phase rollback invalid: {detail}")]
    PhaseRollbackInvalid { detail: String },

    #[error("settings validation failed")]
    SettingsValidation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("AI unavailable")]
    AiUnavailable,

    #[error("request body too large")]
    BodyTooLarge,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Unknown(String),
}

impl OrchestratorError {
    /// Stable machine code, used on the wire (§6) and in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Storage(_) => "STORAGE_ERROR",
            OrchestratorError::Queue(_) => "QUEUE_ERROR",
            OrchestratorError::BusValidation(_) => "VALIDATION_ERROR",
            OrchestratorError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            OrchestratorError::ApprovalAlreadyWaiting { .. } => "APPROVAL_ALREADY_WAITING",
            OrchestratorError::ApprovalCancelled { .. } => "APPROVAL_CANCELLED",
            OrchestratorError::InvalidTicketTransition { .. } => "INVALID_TICKET_TRANSITION",
            OrchestratorError::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            OrchestratorError::InvalidWorkflowState { .. } => "INVALID_STATE",
            OrchestratorError::PhaseRollbackInvalid { .. } => "INVALID_STATE",
            OrchestratorError::SettingsValidation { .. } => "VALIDATION_ERROR",
            OrchestratorError::AiUnavailable => "AI_UNAVAILABLE",
            OrchestratorError::BodyTooLarge => "BODY_TOO_LARGE",
            OrchestratorError::NotFound(_) => "NOT_FOUND",
            OrchestratorError::Io(_) => "INTERNAL_ERROR",
            OrchestratorError::Serialization(_) => "INTERNAL_ERROR",
            OrchestratorError::Unknown(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the OrchestratorAPI layer should render for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::SettingsValidation { .. } => 422,
            OrchestratorError::WorkflowNotFound { .. } | OrchestratorError::NotFound(_) => 404,
            OrchestratorError::BusValidation(_)
            | OrchestratorError::InvalidWorkflowState { .. }
            | OrchestratorError::PhaseRollbackInvalid { .. }
            | OrchestratorError::InvalidTicketTransition { .. }
            | OrchestratorError::ApprovalAlreadyWaiting { .. } => 400,
            OrchestratorError::AiUnavailable => 503,
            OrchestratorError::BodyTooLarge => 413,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
