//! Shared data types for the Forge orchestration engine: workflows, tickets,
//! agent messages, meeting minutes, proposals, deliverables and the paused
//! snapshot written when AI capacity disappears mid-run. Every wire-exposed
//! struct here renders as camelCase JSON to match the persisted layout and
//! HTTP surface; Rust-side field names stay snake_case.

mod deliverable;
mod error;
mod meeting;
mod message;
mod paused;
mod proposal;
mod ticket;
mod workflow;

pub use deliverable::{Deliverable, TestResults};
pub use error::{OrchestratorError, Result};
pub use meeting::{AgendaItem, AgendaStatus, MeetingMinutes, Participant, Statement};
pub use message::{AgentMessage, MessageType, BROADCAST_RECIPIENT};
pub use paused::{PausedProgress, PausedState};
pub use proposal::{Proposal, Risk, RiskSeverity, TaskBreakdownItem, WorkerAssignment};
pub use ticket::{
    ChildTicket, GrandchildTicket, ParentTicket, TicketMeta, TicketStatus, WorkerType,
};
pub use workflow::{Phase, PhaseTransition, Workflow, WorkflowStatus};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A fresh RFC 4122 v4 id rendered as a hyphenated string, the id flavor used
/// throughout the persisted documents (`workflowId`, `meetingId`, ticket ids, ...).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current instant, used instead of scattering `Utc::now()` calls so tests
/// that need determinism have one seam to intercept.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
