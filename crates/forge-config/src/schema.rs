use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The typed, fully-merged view of the recognized options in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub max_concurrent_workers: u32,
    pub default_timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ai_adapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub container_runtime: String,
    pub message_queue_type: String,
    pub git_credential_type: String,
    pub git_ssh_agent_enabled: bool,
    pub state_retention_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_branch: Option<String>,
    pub auto_refresh_interval: u32,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        serde_json::from_value(defaults_value()).expect("schema defaults must deserialize")
    }
}

pub fn defaults_value() -> Value {
    json!({
        "maxConcurrentWorkers": 4,
        "defaultTimeout": 300,
        "containerRuntime": "rootless",
        "messageQueueType": "file",
        "gitCredentialType": "deploy_key",
        "gitSshAgentEnabled": false,
        "stateRetentionDays": 30,
        "autoRefreshInterval": 5,
    })
}

/// One entry per recognized top-level key: its JSON type and, for numeric
/// fields, the inclusive valid range; for enum-shaped fields, the closed set
/// of accepted strings.
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub enum FieldKind {
    IntRange(i64, i64),
    Bool,
    FreeString,
    Enum(&'static [&'static str]),
}

pub const RECOGNIZED_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "maxConcurrentWorkers", kind: FieldKind::IntRange(1, 10) },
    FieldSpec { name: "defaultTimeout", kind: FieldKind::IntRange(30, 3600) },
    FieldSpec { name: "workerMemoryLimit", kind: FieldKind::FreeString },
    FieldSpec { name: "workerCpuLimit", kind: FieldKind::FreeString },
    FieldSpec { name: "defaultAiAdapter", kind: FieldKind::FreeString },
    FieldSpec { name: "defaultModel", kind: FieldKind::FreeString },
    FieldSpec { name: "containerRuntime", kind: FieldKind::Enum(&["dod", "rootless", "dind"]) },
    FieldSpec { name: "messageQueueType", kind: FieldKind::Enum(&["file", "embedded-kv", "network"]) },
    FieldSpec { name: "gitCredentialType", kind: FieldKind::Enum(&["deploy_key", "token", "ssh_agent"]) },
    FieldSpec { name: "gitSshAgentEnabled", kind: FieldKind::Bool },
    FieldSpec { name: "stateRetentionDays", kind: FieldKind::IntRange(1, 365) },
    FieldSpec { name: "integrationBranch", kind: FieldKind::FreeString },
    FieldSpec { name: "autoRefreshInterval", kind: FieldKind::IntRange(1, 3600) },
];

/// Environment variables consulted by the `env` layer, mapped to the
/// recognized field they populate. Namespaced under a `FORGE_` prefix so
/// they don't collide with unrelated process environment variables.
pub const ENV_VAR_MAP: &[(&str, &str)] = &[
    ("FORGE_MAX_CONCURRENT_WORKERS", "maxConcurrentWorkers"),
    ("FORGE_DEFAULT_TIMEOUT", "defaultTimeout"),
    ("FORGE_CONTAINER_RUNTIME", "containerRuntime"),
    ("FORGE_INTEGRATION_BRANCH", "integrationBranch"),
];
