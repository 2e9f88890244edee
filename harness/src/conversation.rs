//! Multi-turn conversation orchestration.
//!
//! [`run_conversation`] drives a sequence of prompts through one shared
//! workspace, resuming the agent session across turns and accumulating every
//! turn's events into a single flat aggregate. Two budgets bound runaway
//! behavior: a turn budget (how many prompts may execute) and an optional
//! action budget (how many times a pattern may match across the whole
//! aggregate). Budget exhaustion is an outcome, never an error.

use std::path::PathBuf;

use anyhow::Result;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::core::detectors::count_matching_tool_starts;
use crate::core::event::EventLog;
use crate::io::client::AgentClient;
use crate::io::workspace::Workspace;
use crate::session::{HaltFn, SessionConfig, SetupFn, run_session};

/// One prompt in a conversation, labelled for diagnostics.
#[derive(Debug, Clone)]
pub struct TurnPrompt {
    pub label: String,
    pub prompt: String,
}

impl TurnPrompt {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
        }
    }
}

/// A named pattern whose tool-start matches count as "actions".
#[derive(Debug, Clone)]
pub struct RunawayPattern {
    pub name: String,
    pub pattern: Regex,
}

impl RunawayPattern {
    pub fn new(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            pattern,
        }
    }

    /// Deployment attempts, the canonical runaway to bound.
    pub fn deploy_attempts() -> Self {
        Self::new(
            "deploy-attempts",
            Regex::new(r"(?i)azd\s+(?:up|deploy|provision)|az\s+(?:webapp|containerapp)\s+up")
                .expect("valid deploy pattern"),
        )
    }
}

/// Cap on pattern matches across the whole conversation aggregate.
#[derive(Debug, Clone)]
pub struct ActionBudget {
    pub runaway: RunawayPattern,
    /// Exceeded when the aggregate count goes *above* this.
    pub max_actions: usize,
}

/// Parameters for one conversation.
pub struct ConversationConfig {
    pub turns: Vec<TurnPrompt>,
    /// Maximum number of turns that may execute.
    pub max_turns: usize,
    pub action_budget: Option<ActionBudget>,
    /// Workspace preparation, run once before the first turn.
    pub setup: Option<SetupFn>,
    /// Early-termination predicate, evaluated within every turn.
    pub halt: Option<HaltFn>,
    pub workspace_base: PathBuf,
    pub workspace_prefix: String,
    pub preserve_workspace: bool,
    pub unattended: bool,
    pub skill_dir: Option<PathBuf>,
    pub tool_config: Option<PathBuf>,
}

impl ConversationConfig {
    pub fn new(turns: Vec<TurnPrompt>, max_turns: usize, workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            turns,
            max_turns,
            action_budget: None,
            setup: None,
            halt: None,
            workspace_base: workspace_base.into(),
            workspace_prefix: "conversation".to_string(),
            preserve_workspace: false,
            unattended: true,
            skill_dir: None,
            tool_config: None,
        }
    }
}

/// Why a conversation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Every prompt executed and the agent went idle.
    Completed,
    /// A turn's halt predicate fired.
    EarlyTerminated,
    /// The turn budget was reached with prompts remaining.
    TurnBudgetExceeded,
    /// The aggregate exceeded the action budget.
    ActionBudgetExceeded,
    /// A turn failed mid-run; the aggregate up to that point is retained.
    Errored { message: String },
}

/// Outcome of a conversation, whatever the termination reason.
#[derive(Debug)]
pub struct ConversationResult {
    /// Flat aggregate of every executed turn's events, in arrival order.
    pub events: EventLog,
    pub reason: TerminationReason,
    pub turns_executed: usize,
    /// Events contributed by each executed turn, for attribution.
    pub turn_event_counts: Vec<usize>,
    /// Session id of the last completed turn.
    pub session_id: Option<String>,
    /// Preserved workspace, when `preserve_workspace`.
    pub workspace: Option<PathBuf>,
}

/// Run prompts in order through one workspace until a budget, halt, error,
/// or the end of the script stops the conversation.
///
/// `Err` is reserved for failures before any turn can run (workspace
/// allocation); everything after that is reported in-band so the partial
/// aggregate survives and cleanup still happens.
#[instrument(skip_all, fields(turns = config.turns.len(), max_turns = config.max_turns))]
pub fn run_conversation<C: AgentClient>(
    client: &C,
    config: ConversationConfig,
) -> Result<ConversationResult> {
    let mut config = config;
    let workspace = Workspace::allocate(&config.workspace_base, &config.workspace_prefix)?;

    let mut aggregate = EventLog::new();
    let mut turn_event_counts = Vec::new();
    let mut session_id: Option<String> = None;
    let mut turns_executed = 0usize;
    let mut reason = TerminationReason::Completed;
    let mut setup = config.setup.take();

    for turn in &config.turns {
        if turns_executed >= config.max_turns {
            info!(turn = %turn.label, "turn budget reached with prompts remaining");
            reason = TerminationReason::TurnBudgetExceeded;
            break;
        }

        let mut session_config = SessionConfig::new(&turn.prompt, &config.workspace_base);
        session_config.workspace = Some(workspace.path.clone());
        session_config.setup = setup.take();
        session_config.halt = config.halt.clone();
        session_config.unattended = config.unattended;
        session_config.resume = session_id.clone();
        session_config.skill_dir = config.skill_dir.clone();
        session_config.tool_config = config.tool_config.clone();

        info!(turn = %turn.label, resumed = session_id.is_some(), "starting turn");
        let outcome = match run_session(client, session_config) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(turn = %turn.label, err = %err, "turn failed");
                reason = TerminationReason::Errored {
                    message: format!("turn '{}' failed: {err:#}", turn.label),
                };
                break;
            }
        };

        turn_event_counts.push(outcome.events.len());
        aggregate.extend_from(&outcome.events);
        if outcome.session_id.is_some() {
            session_id = outcome.session_id;
        }
        turns_executed += 1;

        if let Some(budget) = &config.action_budget {
            let count = count_matching_tool_starts(&aggregate, &budget.runaway.pattern);
            if count > budget.max_actions {
                info!(
                    pattern = %budget.runaway.name,
                    count,
                    max = budget.max_actions,
                    "action budget exceeded"
                );
                reason = TerminationReason::ActionBudgetExceeded;
                break;
            }
        }
        if outcome.early_terminated {
            reason = TerminationReason::EarlyTerminated;
            break;
        }
    }

    let kept_workspace = if config.preserve_workspace {
        info!(path = %workspace.path.display(), "workspace preserved");
        Some(workspace.path.clone())
    } else {
        workspace.remove_best_effort();
        None
    };

    info!(turns_executed, reason = ?reason, events = aggregate.len(), "conversation resolved");
    Ok(ConversationResult {
        events: aggregate,
        reason,
        turns_executed,
        turn_event_counts,
        session_id,
        workspace: kept_workspace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::SessionEvent;
    use crate::test_support::{ScriptedClient, script};

    fn turns(labels: &[&str]) -> Vec<TurnPrompt> {
        labels
            .iter()
            .map(|label| TurnPrompt::new(*label, format!("{label} prompt")))
            .collect()
    }

    #[test]
    fn completes_and_threads_session_id_across_turns() {
        let base = tempfile::tempdir().expect("tempdir");
        let client = ScriptedClient::new(vec![
            script::events(vec![script::full("m1", "turn one"), SessionEvent::Idle])
                .with_session_id("s-abc"),
            script::events(vec![script::full("m2", "turn two"), SessionEvent::Idle])
                .with_session_id("s-abc"),
        ]);
        let config = ConversationConfig::new(turns(&["first", "second"]), 5, base.path());

        let result = run_conversation(&client, config).expect("run");

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(result.turns_executed, 2);
        assert_eq!(result.turn_event_counts, vec![1, 1]);
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.session_id.as_deref(), Some("s-abc"));

        let options = client.created_options();
        assert_eq!(options[0].resume, None);
        assert_eq!(options[1].resume.as_deref(), Some("s-abc"));
        // All turns share the first turn's workspace.
        assert_eq!(options[0].workdir, options[1].workdir);
    }

    #[test]
    fn turn_budget_stops_before_remaining_prompts() {
        let base = tempfile::tempdir().expect("tempdir");
        let client = ScriptedClient::new(vec![
            script::events(vec![SessionEvent::Idle]),
            script::events(vec![SessionEvent::Idle]),
            script::events(vec![SessionEvent::Idle]),
        ]);
        let config = ConversationConfig::new(turns(&["a", "b", "c"]), 2, base.path());

        let result = run_conversation(&client, config).expect("run");

        assert_eq!(result.reason, TerminationReason::TurnBudgetExceeded);
        assert_eq!(result.turns_executed, 2);
        assert_eq!(client.sessions_created(), 2);
    }

    #[test]
    fn action_budget_recounts_over_whole_aggregate() {
        let base = tempfile::tempdir().expect("tempdir");
        let deploy = |id: &str| {
            script::tool_start(id, "shell", serde_json::json!({"command": "azd up --no-prompt"}))
        };
        let client = ScriptedClient::new(vec![
            script::events(vec![deploy("c1"), SessionEvent::Idle]),
            script::events(vec![deploy("c2"), SessionEvent::Idle]),
        ]);
        let mut config = ConversationConfig::new(turns(&["a", "b", "c"]), 10, base.path());
        config.action_budget = Some(ActionBudget {
            runaway: RunawayPattern::deploy_attempts(),
            max_actions: 1,
        });

        let result = run_conversation(&client, config).expect("run");

        assert_eq!(result.reason, TerminationReason::ActionBudgetExceeded);
        assert_eq!(result.turns_executed, 2);
        assert_eq!(client.sessions_created(), 2, "third turn never starts");
    }

    #[test]
    fn errored_turn_keeps_partial_aggregate_and_removes_workspace() {
        let base = tempfile::tempdir().expect("tempdir");
        let client = ScriptedClient::new(vec![
            script::events(vec![script::full("m1", "fine"), SessionEvent::Idle]),
            script::unavailable("agent went away"),
        ]);
        let config = ConversationConfig::new(turns(&["a", "b"]), 5, base.path());

        let result = run_conversation(&client, config).expect("run");

        let TerminationReason::Errored { message } = &result.reason else {
            panic!("expected errored, got {:?}", result.reason);
        };
        assert!(message.contains("turn 'b' failed"));
        assert_eq!(result.turns_executed, 1);
        assert_eq!(result.events.len(), 1);
        assert_eq!(std::fs::read_dir(base.path()).expect("read base").count(), 0);
    }

    #[test]
    fn early_termination_in_a_turn_ends_the_conversation() {
        let base = tempfile::tempdir().expect("tempdir");
        let client = ScriptedClient::new(vec![script::events(vec![
            script::tool_start("c1", "deploy", serde_json::json!({})),
            SessionEvent::Idle,
        ])]);
        let mut config = ConversationConfig::new(turns(&["a", "b"]), 5, base.path());
        config.halt = Some(crate::session::halt_on_tool("deploy"));

        let result = run_conversation(&client, config).expect("run");

        assert_eq!(result.reason, TerminationReason::EarlyTerminated);
        assert_eq!(result.turns_executed, 1);
        assert_eq!(client.sessions_created(), 1);
    }
}
