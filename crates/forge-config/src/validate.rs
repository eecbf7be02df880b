use crate::schema::{FieldKind, RECOGNIZED_FIELDS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of validating a config patch: `{valid, errors, warnings}`, per the
/// `validateConfig`/`updateConfig` wire contract in §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates every key in `patch` against the recognized-options table.
/// Collects every violation rather than failing on the first one, so a
/// caller can fix an entire patch in one round trip.
pub fn validate_patch(patch: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Value::Object(map) = patch else {
        report.errors.push("config patch must be a JSON object".to_string());
        return report;
    };

    for (key, value) in map {
        let Some(spec) = RECOGNIZED_FIELDS.iter().find(|f| f.name == key) else {
            report.errors.push(format!("unknown configuration field: {key}"));
            continue;
        };
        match &spec.kind {
            FieldKind::IntRange(min, max) => match value.as_i64() {
                Some(n) if n >= *min && n <= *max => {}
                Some(n) => report.errors.push(format!(
                    "{key} must be between {min} and {max}, got {n}"
                )),
                None => report.errors.push(format!("{key} must be an integer")),
            },
            FieldKind::Bool => {
                if !value.is_boolean() {
                    report.errors.push(format!("{key} must be a boolean"));
                }
            }
            FieldKind::FreeString => {
                if !value.is_string() {
                    report.errors.push(format!("{key} must be a string"));
                } else if value.as_str().map(str::is_empty).unwrap_or(false) {
                    report.warnings.push(format!("{key} is set but empty"));
                }
            }
            FieldKind::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => {}
                Some(s) => report.errors.push(format!(
                    "{key} must be one of {allowed:?}, got \"{s}\""
                )),
                None => report.errors.push(format!("{key} must be a string")),
            },
        }
    }

    if map.contains_key("gitSshAgentEnabled")
        && map
            .get("gitCredentialType")
            .and_then(Value::as_str)
            .map(|s| s != "ssh_agent")
            .unwrap_or(false)
    {
        report
            .warnings
            .push("gitSshAgentEnabled has no effect unless gitCredentialType is ssh_agent".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_valid_patch() {
        let report = validate_patch(&json!({ "maxConcurrentWorkers": 6, "containerRuntime": "dind" }));
        assert!(report.valid());
    }

    #[test]
    fn rejects_out_of_range_int() {
        let report = validate_patch(&json!({ "stateRetentionDays": 0 }));
        assert!(!report.valid());
    }

    #[test]
    fn rejects_invalid_enum_value() {
        let report = validate_patch(&json!({ "messageQueueType": "carrier-pigeon" }));
        assert!(!report.valid());
    }

    #[test]
    fn rejects_unknown_key() {
        let report = validate_patch(&json!({ "nope": 1 }));
        assert!(!report.valid());
    }

    #[test]
    fn warns_on_ineffective_ssh_agent_flag() {
        let report = validate_patch(&json!({
            "gitCredentialType": "token",
            "gitSshAgentEnabled": true
        }));
        assert!(report.valid());
        assert!(!report.warnings.is_empty());
    }
}
