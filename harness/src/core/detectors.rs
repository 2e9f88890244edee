//! Stateless regression detectors over a captured event log.
//!
//! Each detector is an independent pure function returning a count, so tests
//! can assert `<= max_allowed`. All detectors return 0 on an empty log and do
//! not depend on being called in any particular order.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::event::{EventLog, SessionEvent};
use crate::core::invocations::{self, correlate, tool_argument_text};
use crate::core::messages::assistant_text;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)(?:password|passwd|pwd)\s*[:=]\s*["'][^"']{4,}"#,
        r#"(?i)(?:api[_-]?key|apikey)\s*[:=]\s*["'][^"']{8,}"#,
        r#"(?i)(?:secret|token)\s*[:=]\s*["'][A-Za-z0-9+/=]{16,}"#,
        r#"(?i)(?:connection[_-]?string)\s*[:=]\s*["'][^"']{20,}"#,
        r"(?i)DefaultEndpointsProtocol=https;AccountName=",
        r"(?i)SharedAccessSignature=sv=",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid secret pattern"))
    .collect()
});

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:acr|docker|registry)\s+(?:login|push|pull)|az\s+acr")
        .expect("valid auth pattern")
});

static PORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)WEBSITES_PORT\s*[:=]\s*["']?(\d+)"#,
        r#"(?i)(?:^|\s)PORT\s*[:=]\s*["']?(\d+)"#,
        r"(?i)EXPOSE\s+(\d+)",
        r"(?i)\.listen\(\s*(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid port pattern"))
    .collect()
});

static WEB_APP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:web\s*app|app\s*service|microsoft\.web/sites)\b")
        .expect("valid web app pattern")
});

static CONTAINER_APPS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:container\s*apps?|ACA|microsoft\.app/containerApps)\b")
        .expect("valid container apps pattern")
});

/// Tools whose arguments end up as file or shell content. Matched by
/// substring so provider-specific names like `str_replace_edit` still count.
const WRITE_TOOLS: [&str; 4] = ["create", "edit", "write", "shell"];

/// Count credential-shaped strings written through file/shell tools.
pub fn count_secret_leaks(log: &EventLog) -> usize {
    let mut count = 0;
    for event in log {
        let SessionEvent::ToolStart {
            tool_name,
            arguments,
            ..
        } = event
        else {
            continue;
        };
        if !WRITE_TOOLS.iter().any(|tool| tool_name.contains(tool)) {
            continue;
        }
        let text = arguments.to_string();
        for pattern in SECRET_PATTERNS.iter() {
            count += pattern.find_iter(&text).count();
        }
    }
    count
}

/// Longest run of consecutive failed registry-auth style invocations
/// (login/push/pull against a container registry).
pub fn count_auth_spirals(log: &EventLog) -> usize {
    invocations::longest_failure_spiral(log, &AUTH_PATTERN)
}

/// Count conflicting port values referenced across configuration sites.
///
/// Scans assistant messages and tool arguments for PORT/EXPOSE/listen style
/// references; `n` distinct port numbers count as `n - 1` conflicts.
pub fn count_port_conflicts(log: &EventLog) -> usize {
    let haystack = format!("{}\n{}", assistant_text(log), tool_argument_text(log));
    let mut ports = std::collections::BTreeSet::new();
    for pattern in PORT_PATTERNS.iter() {
        for captures in pattern.captures_iter(&haystack) {
            if let Some(port) = captures.get(1) {
                ports.insert(port.as_str().to_string());
            }
        }
    }
    ports.len().saturating_sub(1)
}

/// Count hosting-choice reversals across assistant messages.
///
/// A reversal is a line asserting one hosting style after a different style
/// was last asserted (web app vs. container apps).
pub fn count_hosting_thrash(log: &EventLog) -> usize {
    let text = assistant_text(log);
    let mut current: Option<&str> = None;
    let mut reversals = 0;
    for line in text.lines() {
        let is_web_app = WEB_APP_PATTERN.is_match(line);
        let is_container_apps = CONTAINER_APPS_PATTERN.is_match(line);
        let detected = match (is_web_app, is_container_apps) {
            (true, false) => Some("web-app"),
            (false, true) => Some("container-apps"),
            _ => None,
        };
        if let Some(choice) = detected {
            if current.is_some_and(|previous| previous != choice) {
                reversals += 1;
            }
            current = Some(choice);
        }
    }
    reversals
}

/// Count tool starts whose arguments match `pattern`.
///
/// This is the primitive behind runaway-action budgets: the conversation
/// orchestrator recounts a pattern such as deployment attempts over its whole
/// aggregate after every turn.
pub fn count_matching_tool_starts(log: &EventLog, pattern: &Regex) -> usize {
    correlate(log, None)
        .iter()
        .filter(|invocation| pattern.is_match(&invocation.argument_text()))
        .count()
}
