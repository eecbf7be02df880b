use serde::Serialize;

/// Closed set of terminal-error buckets (§4.4/§7). Order of the checks in
/// `classify_error` matters: `git`/`container` are tested before
/// `ai_connection` so "git clone failed: connection refused" classifies as
/// `git`, not `ai_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AiConnection,
    ToolCall,
    Git,
    Container,
    Timeout,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::AiConnection => "ai_connection",
            ErrorCategory::ToolCall => "tool_call",
            ErrorCategory::Git => "git",
            ErrorCategory::Container => "container",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Lowercase-keyword classification: each category is a fixed keyword list
/// checked in order, so the first matching category wins.
pub fn classify_error(error: &str) -> ErrorCategory {
    let e = error.to_lowercase();

    if contains_any(&e, &["git clone", "git push", "git pull", "merge conflict", "git checkout", "detached head"]) {
        return ErrorCategory::Git;
    }
    if contains_any(&e, &["container", "docker", "rootless", "sandbox escape", "oci runtime"]) {
        return ErrorCategory::Container;
    }
    if contains_any(&e, &["timed out", "timeout", "deadline exceeded"]) {
        return ErrorCategory::Timeout;
    }
    if contains_any(&e, &["validation", "invalid schema", "schema mismatch", "malformed"]) {
        return ErrorCategory::Validation;
    }
    if contains_any(&e, &["tool call", "tool_call", "tool execution failed", "unknown tool"]) {
        return ErrorCategory::ToolCall;
    }
    if contains_any(
        &e,
        &[
            "connection refused",
            "connection reset",
            "econnrefused",
            "network",
            "socket hang up",
            "dns",
            "rate limit",
            "ratelimit",
            "too many requests",
            "http 429",
        ],
    ) {
        return ErrorCategory::AiConnection;
    }

    ErrorCategory::Unknown
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_takes_priority_over_connection_keywords() {
        let category = classify_error("git clone failed: connection refused");
        assert_eq!(category, ErrorCategory::Git);
    }

    #[test]
    fn container_takes_priority_over_connection_keywords() {
        let category = classify_error("docker container failed: connection reset");
        assert_eq!(category, ErrorCategory::Container);
    }

    #[test]
    fn plain_connection_refused_is_ai_connection() {
        assert_eq!(classify_error("Connection refused"), ErrorCategory::AiConnection);
    }

    #[test]
    fn unrecognized_error_is_unknown() {
        assert_eq!(classify_error("the quantum flux capacitor overheated"), ErrorCategory::Unknown);
    }
}
