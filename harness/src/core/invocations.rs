//! Correlation of tool invocation start/completion pairs.
//!
//! Starts and completions arrive as separate events linked by call id. An
//! invocation with no completion in the log is pending/unterminated and is
//! treated as failed for gating purposes.

use regex::Regex;

use crate::core::event::{EventLog, SessionEvent};

/// Terminal report for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub success: bool,
    pub error: Option<String>,
}

/// One tool invocation reconstructed from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// `None` while pending/unterminated.
    pub completion: Option<Completion>,
}

impl ToolInvocation {
    /// True iff a completion exists and reports success.
    pub fn succeeded(&self) -> bool {
        self.completion
            .as_ref()
            .is_some_and(|completion| completion.success)
    }

    /// Invocation arguments rendered as JSON text, for pattern scans.
    pub fn argument_text(&self) -> String {
        self.arguments.to_string()
    }
}

/// Reconstruct invocations in arrival order of their starts.
///
/// A completion without a matching start is ignored: this log also records
/// every start, so such a completion cannot belong to it. If duplicate
/// completions arrive for one call id, the first wins.
pub fn correlate(log: &EventLog, tool_filter: Option<&str>) -> Vec<ToolInvocation> {
    let mut invocations: Vec<ToolInvocation> = Vec::new();
    for event in log {
        match event {
            SessionEvent::ToolStart {
                call_id,
                tool_name,
                arguments,
            } => {
                if tool_filter.is_some_and(|filter| filter != tool_name) {
                    continue;
                }
                invocations.push(ToolInvocation {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                    completion: None,
                });
            }
            SessionEvent::ToolComplete {
                call_id,
                success,
                error,
            } => {
                if let Some(invocation) = invocations
                    .iter_mut()
                    .find(|inv| inv.call_id == *call_id && inv.completion.is_none())
                {
                    invocation.completion = Some(Completion {
                        success: *success,
                        error: error.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    invocations
}

/// Whether every invocation of `tool_name` completed successfully.
///
/// False when the filtered set is empty: "no calls" is never treated as
/// success.
pub fn all_succeeded(log: &EventLog, tool_name: &str) -> bool {
    let invocations = correlate(log, Some(tool_name));
    !invocations.is_empty() && invocations.iter().all(ToolInvocation::succeeded)
}

/// Longest run of consecutive failures among invocations whose arguments
/// match `pattern`, in arrival order. Pending invocations count as failures.
pub fn longest_failure_spiral(log: &EventLog, pattern: &Regex) -> usize {
    let mut consecutive = 0usize;
    let mut longest = 0usize;
    for invocation in correlate(log, None) {
        if !pattern.is_match(&invocation.argument_text()) {
            continue;
        }
        if invocation.succeeded() {
            consecutive = 0;
        } else {
            consecutive += 1;
            longest = longest.max(consecutive);
        }
    }
    longest
}

/// All tool-start arguments rendered as JSON text, one invocation per line.
/// Shared haystack for detectors that scan arguments regardless of tool.
pub fn tool_argument_text(log: &EventLog) -> String {
    let mut buf = String::new();
    for event in log {
        if let SessionEvent::ToolStart { arguments, .. } = event {
            buf.push_str(&arguments.to_string());
            buf.push('\n');
        }
    }
    buf
}

/// Whether the agent routed through the named skill.
///
/// Skill activations surface as invocations of the `skill` tool whose
/// arguments name the skill.
pub fn skill_invoked(log: &EventLog, skill_name: &str) -> bool {
    correlate(log, Some("skill"))
        .iter()
        .any(|invocation| invocation.argument_text().contains(skill_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(call_id: &str, tool: &str, args: serde_json::Value) -> SessionEvent {
        SessionEvent::ToolStart {
            call_id: call_id.to_string(),
            tool_name: tool.to_string(),
            arguments: args,
        }
    }

    fn complete(call_id: &str, success: bool) -> SessionEvent {
        SessionEvent::ToolComplete {
            call_id: call_id.to_string(),
            success,
            error: None,
        }
    }

    #[test]
    fn matched_completion_reports_success() {
        let log = EventLog::from(vec![
            start("c1", "shell", serde_json::json!({"command": "ls"})),
            complete("c1", true),
        ]);
        let invocations = correlate(&log, None);
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].succeeded());
    }

    #[test]
    fn pending_invocation_counts_as_failed() {
        let log = EventLog::from(vec![start("c1", "shell", serde_json::Value::Null)]);
        let invocations = correlate(&log, None);
        assert!(!invocations[0].succeeded());
        assert!(!all_succeeded(&log, "shell"));
    }

    #[test]
    fn all_succeeded_is_false_on_empty_filter_set() {
        let log = EventLog::from(vec![
            start("c1", "shell", serde_json::Value::Null),
            complete("c1", true),
        ]);
        assert!(!all_succeeded(&log, "edit"));
        assert!(!all_succeeded(&EventLog::new(), "shell"));
    }

    #[test]
    fn unmatched_completion_is_ignored() {
        let log = EventLog::from(vec![complete("ghost", true)]);
        assert!(correlate(&log, None).is_empty());
    }

    #[test]
    fn spiral_counts_longest_run_not_total() {
        let log = EventLog::from(vec![
            start("c1", "shell", serde_json::json!({"command": "docker login"})),
            complete("c1", false),
            start("c2", "shell", serde_json::json!({"command": "docker login"})),
            complete("c2", false),
            start("c3", "shell", serde_json::json!({"command": "docker login"})),
            complete("c3", true),
            start("c4", "shell", serde_json::json!({"command": "docker login"})),
            complete("c4", false),
        ]);
        let pattern = Regex::new(r"docker login").expect("pattern");
        assert_eq!(longest_failure_spiral(&log, &pattern), 2);
    }

    #[test]
    fn spiral_ignores_non_matching_invocations() {
        let log = EventLog::from(vec![
            start("c1", "shell", serde_json::json!({"command": "docker login"})),
            complete("c1", false),
            start("c2", "shell", serde_json::json!({"command": "cargo test"})),
            complete("c2", false),
            start("c3", "shell", serde_json::json!({"command": "docker login"})),
            complete("c3", false),
        ]);
        let pattern = Regex::new(r"docker login").expect("pattern");
        assert_eq!(longest_failure_spiral(&log, &pattern), 2);
    }

    #[test]
    fn argument_text_covers_every_start_in_order() {
        let log = EventLog::from(vec![
            start("c1", "shell", serde_json::json!({"command": "ls"})),
            complete("c1", true),
            start("c2", "edit", serde_json::json!({"path": "main.ts"})),
        ]);
        let text = tool_argument_text(&log);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ls"));
        assert!(lines[1].contains("main.ts"));
    }

    #[test]
    fn skill_invocation_detected_from_arguments() {
        let log = EventLog::from(vec![start(
            "c1",
            "skill",
            serde_json::json!({"name": "azure-prepare"}),
        )]);
        assert!(skill_invoked(&log, "azure-prepare"));
        assert!(!skill_invoked(&log, "azure-deploy"));
    }
}
