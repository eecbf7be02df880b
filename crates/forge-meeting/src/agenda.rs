use forge_types::{AgendaItem, AgendaStatus};

/// One candidate agenda topic: included when its keywords appear in the
/// instruction, or unconditionally when `baseline`.
struct CandidateTopic {
    id: &'static str,
    topic: &'static str,
    description: &'static str,
    keywords: &'static [&'static str],
    required_expertise: &'static [&'static str],
    baseline: bool,
}

const CANDIDATES: &[CandidateTopic] = &[
    CandidateTopic {
        id: "scope_definition",
        topic: "Scope & Requirements",
        description: "Clarify what the instruction asks for and what is out of scope.",
        keywords: &[],
        required_expertise: &["product", "requirements"],
        baseline: true,
    },
    CandidateTopic {
        id: "architecture_design",
        topic: "Architecture & Design",
        description: "Decide the system shape and component boundaries for the work.",
        keywords: &[],
        required_expertise: &["architecture", "backend"],
        baseline: true,
    },
    CandidateTopic {
        id: "security_review",
        topic: "Security Review",
        description: "Identify authentication, authorization and data-handling risks.",
        keywords: &["認証", "security", "auth", "password", "token", "login"],
        required_expertise: &["security"],
        baseline: false,
    },
    CandidateTopic {
        id: "testing_strategy",
        topic: "Testing Strategy",
        description: "Define how the work will be verified before delivery.",
        keywords: &["テスト", "test", "qa", "quality", "検証"],
        required_expertise: &["qa", "test"],
        baseline: false,
    },
    CandidateTopic {
        id: "deployment_plan",
        topic: "Deployment & Rollout",
        description: "Plan how the change reaches production safely.",
        keywords: &["デプロイ", "deploy", "release", "rollout", "リリース", "infra"],
        required_expertise: &["devops", "infra"],
        baseline: false,
    },
    CandidateTopic {
        id: "data_model",
        topic: "Data Model",
        description: "Shape the data schema and migrations the work requires.",
        keywords: &["データ", "database", "schema", "data", "db", "永続化"],
        required_expertise: &["data", "backend"],
        baseline: false,
    },
];

const MIN_ITEMS: usize = 2;
const MAX_ITEMS: usize = 5;

/// Derives a 2–5 item agenda from instruction keywords (§4.6). Baseline
/// topics are always present; the remaining candidates are added in
/// declaration order as their keywords match, until the cap is reached.
pub fn derive_agenda(instruction: &str) -> Vec<AgendaItem> {
    let lowered = instruction.to_lowercase();
    let mut selected: Vec<&CandidateTopic> = CANDIDATES.iter().filter(|c| c.baseline).collect();

    for candidate in CANDIDATES.iter().filter(|c| !c.baseline) {
        if selected.len() >= MAX_ITEMS {
            break;
        }
        let matches = candidate
            .keywords
            .iter()
            .any(|kw| lowered.contains(&kw.to_lowercase()) || instruction.contains(kw));
        if matches {
            selected.push(candidate);
        }
    }

    // Guarantee the floor even if somehow fewer than MIN_ITEMS baselines exist.
    for candidate in CANDIDATES.iter() {
        if selected.len() >= MIN_ITEMS {
            break;
        }
        if !selected.iter().any(|c| c.id == candidate.id) {
            selected.push(candidate);
        }
    }

    selected
        .into_iter()
        .map(|c| AgendaItem {
            id: c.id.to_string(),
            topic: c.topic.to_string(),
            description: c.description.to_string(),
            status: AgendaStatus::Pending,
            summary: None,
        })
        .collect()
}

/// Expertise tags relevant to a derived agenda item, used to pick
/// participants. Falls back to an empty slice for unrecognized ids (should
/// not happen for agenda items produced by `derive_agenda`).
pub fn required_expertise(agenda_item_id: &str) -> &'static [&'static str] {
    CANDIDATES
        .iter()
        .find(|c| c.id == agenda_item_id)
        .map(|c| c.required_expertise)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_topics_always_present() {
        let agenda = derive_agenda("do something unrelated");
        assert!(agenda.len() >= MIN_ITEMS);
        assert!(agenda.iter().any(|i| i.id == "scope_definition"));
        assert!(agenda.iter().any(|i| i.id == "architecture_design"));
    }

    #[test]
    fn security_keyword_adds_security_review() {
        let agenda = derive_agenda("ユーザー認証機能を実装してください");
        assert!(agenda.iter().any(|i| i.id == "security_review"));
    }

    #[test]
    fn agenda_never_exceeds_five_items() {
        let agenda = derive_agenda("認証 test デプロイ database 永続化");
        assert!(agenda.len() <= MAX_ITEMS);
    }
}
