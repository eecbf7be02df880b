//! Layered configuration for the Forge engine: layers are merged in
//! increasing precedence with a recursive `deep_merge` over
//! `serde_json::Value`, and every layer above defaults is optional. A
//! headless service only needs the three layers that matter here: built-in
//! defaults, the persisted `state/config.json`, and environment variables,
//! plus a `runtime` layer for request-scoped `updateConfig` calls.

mod schema;
mod validate;

pub use schema::EffectiveConfig;
pub use validate::{validate_patch, ValidationReport};

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Layers {
    persisted: Value,
    env: Value,
    runtime: Value,
}

/// The layered store. Cheap to clone (an `Arc` around the actual state).
#[derive(Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
    layers: Arc<RwLock<Layers>>,
}

impl ConfigStore {
    /// Loads `state/config.json` (if present) and the recognized
    /// environment variables, and seeds the runtime layer empty.
    pub async fn load(config_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.into();
        let persisted = match tokio::fs::read(&config_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| empty_object()),
            Err(_) => empty_object(),
        };
        let layers = Layers {
            persisted,
            env: env_layer(),
            runtime: empty_object(),
        };
        Ok(Self {
            config_path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    /// Merges defaults < persisted < env < runtime and returns the typed
    /// view. Unknown/invalid merged values fall back to the schema default
    /// for that field rather than failing the read — validation happens on
    /// write (`updateConfig`/`validateConfig`), not on every read.
    pub async fn effective(&self) -> EffectiveConfig {
        let merged = self.effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn effective_value(&self) -> Value {
        let layers = self.layers.read().await;
        let mut merged = schema::defaults_value();
        deep_merge(&mut merged, &layers.persisted);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    /// Validates `patch` against the recognized-options table (§6) without
    /// persisting it. Used by both `validateConfig` and as the first step of
    /// `updateConfig`.
    pub async fn validate(&self, patch: &Value) -> ValidationReport {
        validate_patch(patch)
    }

    /// Merges `patch` into the persisted layer and writes `state/config.json`
    /// atomically, but only if validation reports no errors (warnings do not
    /// block persistence).
    pub async fn update_persisted(&self, patch: Value) -> anyhow::Result<ValidationReport> {
        let report = self.validate(&patch).await;
        if !report.errors.is_empty() {
            return Ok(report);
        }
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.persisted, &patch);
        }
        self.flush().await?;
        Ok(report)
    }

    /// Merges `patch` into the runtime layer only (not persisted); used for
    /// process-lifetime overrides such as a CLI flag or a one-off API call.
    pub async fn apply_runtime(&self, patch: Value) -> ValidationReport {
        let report = self.validate(&patch).await;
        if report.errors.is_empty() {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.runtime, &patch);
        }
        report
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let persisted = self.layers.read().await.persisted.clone();
        let mut scrubbed = persisted;
        scrub_secrets(&mut scrubbed);
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(&scrubbed)?;
        let temp_path = self.config_path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &self.config_path).await?;
        Ok(())
    }
}

fn empty_object() -> Value {
    json!({})
}

fn env_layer() -> Value {
    let mut obj = serde_json::Map::new();
    for (env_key, field) in schema::ENV_VAR_MAP {
        let Ok(raw) = std::env::var(env_key) else { continue };
        let spec = schema::RECOGNIZED_FIELDS.iter().find(|f| f.name == *field);
        let value = match spec.map(|f| &f.kind) {
            Some(schema::FieldKind::IntRange(_, _)) => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::String(raw)),
            Some(schema::FieldKind::Bool) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Value::Bool(true),
                "0" | "false" | "no" | "off" => Value::Bool(false),
                _ => Value::String(raw),
            },
            _ => Value::String(raw),
        };
        obj.insert((*field).to_string(), value);
    }
    Value::Object(obj)
}

/// Recursive merge: object keys from `overlay` win, recursing into nested
/// objects; any other JSON value in `overlay` replaces the base wholesale.
/// `null` in the overlay means "no opinion", not "clear the field".
fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

/// Redacts fields that look like secrets before the config is written back
/// to disk. This engine has no provider API keys of its own (those live
/// behind the opaque `AgentDriver`), but git credential hints are still
/// worth scrubbing if an operator pastes a token into
/// `gitCredentialType`-adjacent fields.
fn scrub_secrets(value: &mut Value) {
    if let Value::Object(map) = value {
        for (key, v) in map.iter_mut() {
            let lower = key.to_lowercase();
            if lower.contains("token") || lower.contains("secret") || lower.contains("password") {
                if let Value::String(s) = v {
                    if !s.is_empty() {
                        *v = Value::String("[redacted]".to_string());
                    }
                }
            }
        }
    }
}

pub fn config_path_under(root: &Path) -> PathBuf {
    root.join("state").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn effective_config_has_schema_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(config_path_under(dir.path())).await.unwrap();
        let cfg = store.effective().await;
        assert_eq!(cfg.max_concurrent_workers, 4);
        assert_eq!(cfg.state_retention_days, 30);
    }

    #[tokio::test]
    async fn update_persisted_rejects_out_of_range() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(config_path_under(dir.path())).await.unwrap();
        let report = store
            .update_persisted(json!({ "maxConcurrentWorkers": 99 }))
            .await
            .unwrap();
        assert!(!report.errors.is_empty());
        let cfg = store.effective().await;
        assert_eq!(cfg.max_concurrent_workers, 4, "rejected patch must not apply");
    }

    #[tokio::test]
    async fn update_persisted_accepts_valid_patch_and_survives_reload() {
        let dir = tempdir().unwrap();
        let path = config_path_under(dir.path());
        let store = ConfigStore::load(&path).await.unwrap();
        let report = store
            .update_persisted(json!({ "maxConcurrentWorkers": 8 }))
            .await
            .unwrap();
        assert!(report.errors.is_empty());

        let reloaded = ConfigStore::load(&path).await.unwrap();
        let cfg = reloaded.effective().await;
        assert_eq!(cfg.max_concurrent_workers, 8);
    }

    #[tokio::test]
    async fn unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(config_path_under(dir.path())).await.unwrap();
        let report = store
            .validate(&json!({ "totallyMadeUpOption": true }))
            .await;
        assert!(!report.errors.is_empty());
    }
}
