//! Ordered lint→test pipeline: each stage runs as a timeout-bounded, async
//! cancellation-aware subprocess (`tokio::process::Command` with
//! `tokio::select!`), reporting through a pluggable event-sink, and persists
//! its own result document.

mod reporter;
mod sink;

pub use reporter::{DecisionRecommendation, FailurePayload, QualityGateReporter};
pub use sink::{NoopQualityGateEventSink, QualityGateEventSink};

use forge_store::PersistentStore;
use forge_types::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Result of one stage (lint or test) of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub executed: bool,
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageResult {
    fn skipped(reason: impl Into<String>, passed: bool) -> Self {
        Self {
            executed: false,
            passed,
            output: String::new(),
            duration_ms: 0,
            skip_reason: Some(reason.into()),
        }
    }
}

/// The persisted document at `runs/<runId>/quality.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateResult {
    pub run_id: String,
    pub lint: StageResult,
    pub test: StageResult,
    pub overall_passed: bool,
    pub error_count: u32,
    pub warning_count: u32,
}

/// Which commands to run and how long to let them run, per workspace.
/// `None` for either command disables that stage outright (§4.8's "or if
/// configuration disables it").
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    pub lint_command: Option<Vec<String>>,
    pub test_command: Option<Vec<String>>,
    /// Relative paths probed (existence only) to decide whether any test
    /// file exists; if none exist the test stage is skipped.
    pub test_probe_paths: Vec<PathBuf>,
    pub process_timeout: Duration,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            lint_command: None,
            test_command: None,
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(300),
        }
    }
}

/// Runs the lint→test pipeline for one quality-gate execution and persists
/// the result. One instance is shared across workflows; all per-call state
/// (workspace, config) is passed into `execute`.
pub struct QualityGate {
    store: Arc<PersistentStore>,
    sink: Arc<dyn QualityGateEventSink>,
}

impl QualityGate {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            sink: Arc::new(NoopQualityGateEventSink),
        }
    }

    pub fn with_sink(store: Arc<PersistentStore>, sink: Arc<dyn QualityGateEventSink>) -> Self {
        Self { store, sink }
    }

    /// Runs lint, then test (skipped if lint failed), persists
    /// `runs/<runId>/quality.json`, and returns the combined result.
    pub async fn execute(
        &self,
        run_id: &str,
        workspace_dir: &Path,
        config: &QualityGateConfig,
    ) -> Result<QualityGateResult> {
        self.sink.lint_start(run_id).await;
        let lint = self.run_lint(workspace_dir, config).await;
        self.sink.lint_complete(run_id, &lint).await;
        if !lint.passed {
            self.sink.error(run_id, "lint stage failed").await;
        }

        self.sink.test_start(run_id).await;
        let test = self.run_test(workspace_dir, config, lint.passed).await;
        self.sink.test_complete(run_id, &test).await;
        if test.executed && !test.passed {
            self.sink.error(run_id, "test stage failed").await;
        }

        let output_for_counts = format!("{}\n{}", lint.output, test.output);
        let result = QualityGateResult {
            run_id: run_id.to_string(),
            error_count: count_keyword(&output_for_counts, "error"),
            warning_count: count_keyword(&output_for_counts, "warning"),
            overall_passed: lint.passed && test.passed,
            lint,
            test,
        };

        self.store
            .save("runs", &format!("{run_id}/quality"), &result)
            .await?;
        Ok(result)
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<QualityGateResult>> {
        self.store.load("runs", &format!("{run_id}/quality")).await
    }

    async fn run_lint(&self, workspace_dir: &Path, config: &QualityGateConfig) -> StageResult {
        let Some(command) = &config.lint_command else {
            return StageResult::skipped("lint disabled by configuration", true);
        };
        self.run_command(workspace_dir, command, config.process_timeout)
            .await
    }

    async fn run_test(
        &self,
        workspace_dir: &Path,
        config: &QualityGateConfig,
        lint_passed: bool,
    ) -> StageResult {
        if !lint_passed {
            return StageResult::skipped("skipped because lint failed", false);
        }
        let Some(command) = &config.test_command else {
            return StageResult::skipped("test disabled by configuration", true);
        };
        if !config.test_probe_paths.is_empty()
            && !config.test_probe_paths.iter().any(|p| workspace_dir.join(p).exists())
        {
            return StageResult::skipped("no test file discoverable", true);
        }
        self.run_command(workspace_dir, command, config.process_timeout)
            .await
    }

    async fn run_command(
        &self,
        workspace_dir: &Path,
        command: &[String],
        timeout: Duration,
    ) -> StageResult {
        let Some((program, args)) = command.split_first() else {
            return StageResult::skipped("empty command", true);
        };
        let started = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workspace_dir);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return StageResult {
                    executed: true,
                    passed: false,
                    output: format!("failed to launch command: {e}"),
                    duration_ms: started.elapsed().as_millis() as u64,
                    skip_reason: None,
                };
            }
            Err(_) => {
                return StageResult {
                    executed: true,
                    passed: false,
                    output: format!("command timed out after {}ms", timeout.as_millis()),
                    duration_ms: started.elapsed().as_millis() as u64,
                    skip_reason: None,
                };
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        StageResult {
            executed: true,
            passed: output.status.success(),
            output: combined,
            duration_ms: started.elapsed().as_millis() as u64,
            skip_reason: None,
        }
    }
}

/// Heuristic keyword counter for `error`/`warning` occurrences in combined
/// stage output (§4.8: "parsed heuristically from output").
fn count_keyword(text: &str, keyword: &str) -> u32 {
    text.to_lowercase().matches(keyword).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate() -> (QualityGate, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        (QualityGate::new(store), dir)
    }

    #[tokio::test]
    async fn lint_and_test_pass_when_commands_succeed() {
        let (gate, _dir) = gate();
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["true".to_string()]),
            test_command: Some(vec!["true".to_string()]),
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };
        let result = gate.execute("run-1", workspace.path(), &config).await.unwrap();
        assert!(result.lint.passed);
        assert!(result.test.passed);
        assert!(result.overall_passed);
    }

    #[tokio::test]
    async fn test_stage_skipped_when_lint_fails() {
        let (gate, _dir) = gate();
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["false".to_string()]),
            test_command: Some(vec!["true".to_string()]),
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };
        let result = gate.execute("run-2", workspace.path(), &config).await.unwrap();
        assert!(!result.lint.passed);
        assert!(!result.test.executed);
        assert_eq!(result.test.skip_reason.as_deref(), Some("skipped because lint failed"));
        assert!(!result.overall_passed);
    }

    #[tokio::test]
    async fn test_stage_skipped_when_no_test_file_found() {
        let (gate, _dir) = gate();
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["true".to_string()]),
            test_command: Some(vec!["true".to_string()]),
            test_probe_paths: vec![PathBuf::from("tests/some_test.rs")],
            process_timeout: Duration::from_secs(5),
        };
        let result = gate.execute("run-3", workspace.path(), &config).await.unwrap();
        assert!(!result.test.executed);
        assert_eq!(result.test.skip_reason.as_deref(), Some("no test file discoverable"));
        assert!(result.overall_passed);
    }

    #[tokio::test]
    async fn result_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersistentStore::new(dir.path()));
        let gate = QualityGate::new(store.clone());
        let workspace = tempdir().unwrap();
        let config = QualityGateConfig {
            lint_command: Some(vec!["true".to_string()]),
            test_command: None,
            test_probe_paths: Vec::new(),
            process_timeout: Duration::from_secs(5),
        };
        gate.execute("run-4", workspace.path(), &config).await.unwrap();

        let reloaded_gate = QualityGate::new(store);
        let loaded = reloaded_gate.load("run-4").await.unwrap().unwrap();
        assert!(loaded.overall_passed);
    }
}
