//! AI-availability gating (§4.10/§6): `submitTask` only admits a task when
//! at least one of {local-LLM, registered coding-agent} reports available.
//! Actual model invocation is out of scope for this crate (§1 treats it as
//! an opaque `AgentDriver` capability the workflow engine calls through), so
//! this is a narrow trait seam — the same `EscalationSink`/
//! `QualityGateEventSink` shape used elsewhere in this workspace — that a
//! concrete deployment supplies.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiAvailability {
    pub local_llm_available: bool,
    pub coding_agent_available: bool,
}

impl AiAvailability {
    pub fn any_available(&self) -> bool {
        self.local_llm_available || self.coding_agent_available
    }
}

#[async_trait]
pub trait AiAvailabilityProbe: Send + Sync {
    async fn check(&self) -> AiAvailability;

    /// Human-readable setup hint surfaced on a 503 `AI_UNAVAILABLE` response.
    fn setup_hint(&self) -> Option<String> {
        None
    }
}

/// Stand-in used when no concrete `AgentDriver`/coding-agent registry is
/// wired up (tests, or a deployment that hasn't configured one yet): always
/// reports the local LLM available so admission isn't blocked.
pub struct AlwaysAvailableProbe;

#[async_trait]
impl AiAvailabilityProbe for AlwaysAvailableProbe {
    async fn check(&self) -> AiAvailability {
        AiAvailability {
            local_llm_available: true,
            coding_agent_available: false,
        }
    }
}

/// Fixed-answer probe for tests that need to exercise the unavailable path.
pub struct StaticProbe(pub AiAvailability);

#[async_trait]
impl AiAvailabilityProbe for StaticProbe {
    async fn check(&self) -> AiAvailability {
        self.0
    }

    fn setup_hint(&self) -> Option<String> {
        Some("configure a local LLM adapter or register a coding agent in settings".to_string())
    }
}
