//! Markdown failure-report rendering: builds the report by pushing one
//! Markdown section at a time onto a growing string, rather than templating.

use forge_retry::{ErrorCategory, RecommendedAction};

pub struct FailureEntry {
    pub task_id: String,
    pub category: ErrorCategory,
    pub action: RecommendedAction,
    pub error: String,
}

/// Renders the required sections in order: error list, recommended actions,
/// recovery steps. Every entry passed in must appear under both of the first
/// two sections (§7).
pub fn render_failure_report(workflow_id: &str, entries: &[FailureEntry]) -> String {
    let mut out = String::new();
    out.push_str("# 失敗レポート\n\n");
    out.push_str(&format!("ワークフロー: {workflow_id}\n\n"));

    out.push_str("## エラー一覧\n\n");
    if entries.is_empty() {
        out.push_str("（エラーなし）\n\n");
    } else {
        for entry in entries {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                entry.task_id,
                entry.category.as_str(),
                entry.error
            ));
        }
        out.push('\n');
    }

    out.push_str("## 推奨アクション\n\n");
    if entries.is_empty() {
        out.push_str("（推奨アクションなし）\n\n");
    } else {
        for entry in entries {
            out.push_str(&format!("- [{}] {}\n", entry.task_id, recommended_action_label(entry.action)));
        }
        out.push('\n');
    }

    out.push_str("## リカバリー手順\n\n");
    out.push_str("1. 推奨アクションに従ってタスクを再割り当てまたは再試行してください。\n");
    out.push_str("2. 解決しない場合は品質責任者 (quality_authority) にエスカレーションしてください。\n");
    out.push_str("3. ロールバックが必要な場合は直前のフェーズに戻し、保留中の承認をキャンセルしてください。\n");

    out
}

fn recommended_action_label(action: RecommendedAction) -> &'static str {
    match action {
        RecommendedAction::Reassign => "別のワーカーに再割り当て",
        RecommendedAction::Escalate => "エスカレーション",
        RecommendedAction::ManualReview => "人による確認",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_contains_every_required_section() {
        let report = render_failure_report("wf-1", &[]);
        assert!(report.starts_with("# 失敗レポート"));
        assert!(report.contains("## エラー一覧"));
        assert!(report.contains("## 推奨アクション"));
        assert!(report.contains("## リカバリー手順"));
    }

    #[test]
    fn every_entry_appears_in_both_error_and_action_sections() {
        let entries = vec![FailureEntry {
            task_id: "t1".into(),
            category: ErrorCategory::AiConnection,
            action: RecommendedAction::Reassign,
            error: "connection refused".into(),
        }];
        let report = render_failure_report("wf-1", &entries);
        assert!(report.contains("connection refused"));
        assert!(report.contains("別のワーカーに再割り当て"));
    }
}
