//! Orchestration of one supervised agent session.
//!
//! [`run_session`] owns the whole lifecycle: workspace allocation, optional
//! setup, session creation, prompt submission, event capture, and cleanup.
//! Cleanup is unconditional: whatever happens mid-run, the session handle is
//! destroyed, the client stopped, and the workspace removed (unless preserved
//! or caller-owned).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::event::{EventLog, SessionEvent};
use crate::io::client::{AgentClient, AgentSession, SessionOptions};
use crate::io::workspace::Workspace;

/// Early-termination predicate, evaluated after every appended event.
///
/// Policy only: the predicate decides *whether* to stop; the session manager
/// owns the mechanics (abort, then the usual cleanup).
pub type HaltFn = Arc<dyn Fn(&EventLog) -> bool + Send + Sync>;

/// Workspace preparation callback, run before the agent starts.
pub type SetupFn = Box<dyn FnOnce(&Path) -> Result<()>>;

/// Halt as soon as the named tool is invoked.
pub fn halt_on_tool(tool_name: &str) -> HaltFn {
    let tool_name = tool_name.to_string();
    Arc::new(move |log: &EventLog| {
        log.iter().any(|event| {
            matches!(event, SessionEvent::ToolStart { tool_name: name, .. } if *name == tool_name)
        })
    })
}

/// Halt as soon as any tool invocation's arguments match `pattern`.
pub fn halt_on_command(pattern: Regex) -> HaltFn {
    Arc::new(move |log: &EventLog| {
        log.iter().any(|event| {
            matches!(event, SessionEvent::ToolStart { arguments, .. }
                if pattern.is_match(&arguments.to_string()))
        })
    })
}

/// Parameters for one supervised session.
pub struct SessionConfig {
    /// Prompt submitted once the session is live.
    pub prompt: String,
    /// Workspace preparation, e.g. seeding fixture files.
    pub setup: Option<SetupFn>,
    /// Early-termination predicate.
    pub halt: Option<HaltFn>,
    /// Caller-owned workspace to reuse. When set, the manager neither
    /// allocates nor removes it.
    pub workspace: Option<PathBuf>,
    /// Base directory for manager-allocated workspaces.
    pub workspace_base: PathBuf,
    /// Name prefix for manager-allocated workspaces.
    pub workspace_prefix: String,
    /// Keep a manager-allocated workspace on disk after the run.
    pub preserve_workspace: bool,
    /// Run the agent without confirmation prompts.
    pub unattended: bool,
    /// Resume a previous session by id.
    pub resume: Option<String>,
    /// Skill definitions exposed to the agent.
    pub skill_dir: Option<PathBuf>,
    /// Tool allow/deny configuration file.
    pub tool_config: Option<PathBuf>,
    /// Tee captured events to this file as JSONL while the run progresses.
    pub stream_path: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(prompt: impl Into<String>, workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            setup: None,
            halt: None,
            workspace: None,
            workspace_base: workspace_base.into(),
            workspace_prefix: "session".to_string(),
            preserve_workspace: false,
            unattended: true,
            resume: None,
            skill_dir: None,
            tool_config: None,
            stream_path: None,
        }
    }
}

/// What one supervised session produced.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Every captured event, in arrival order. The terminal idle marker is
    /// not stored; it only resolves the run.
    pub events: EventLog,
    /// Whether the halt predicate ended the run.
    pub early_terminated: bool,
    /// Backend-assigned session id, when the agent reported one.
    pub session_id: Option<String>,
    /// Preserved manager-allocated workspace, when `preserve_workspace`.
    pub workspace: Option<PathBuf>,
}

/// The setup callback failed. Displays the underlying error verbatim so
/// callers see exactly what their callback reported.
#[derive(Debug)]
pub struct SetupFailedError {
    pub source: anyhow::Error,
}

impl std::fmt::Display for SetupFailedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for SetupFailedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Run one supervised session to completion.
///
/// Resolves when the agent goes idle, when its event stream closes, or when
/// the halt predicate fires. Budget-style outcomes are data, not errors;
/// `Err` means the run itself could not proceed (setup, spawn, or a mid-run
/// stream fault).
#[instrument(skip_all, fields(
    prompt_bytes = config.prompt.len(),
    resume = config.resume.is_some(),
    halting = config.halt.is_some(),
))]
pub fn run_session<C: AgentClient>(client: &C, config: SessionConfig) -> Result<SessionOutcome> {
    let mut config = config;
    let setup = config.setup.take();

    let (workspace, caller_owned) = match &config.workspace {
        Some(path) => (Workspace::adopt(path.clone())?, true),
        None => (
            Workspace::allocate(&config.workspace_base, &config.workspace_prefix)?,
            false,
        ),
    };

    let mut session_slot: Option<C::Session> = None;
    let mut log = EventLog::new();
    let mut early_terminated = false;

    let attempt = (|| -> Result<()> {
        if let Some(setup) = setup {
            setup(&workspace.path)
                .map_err(|source| anyhow!(SetupFailedError { source }))?;
        }

        let options = SessionOptions {
            workdir: workspace.path.clone(),
            unattended: config.unattended,
            resume: config.resume.clone(),
            skill_dir: config.skill_dir.clone(),
            tool_config: config.tool_config.clone(),
        };
        let session = session_slot.insert(client.create_session(&options)?);

        early_terminated = drive(
            session,
            &config.prompt,
            config.halt.as_ref(),
            &mut log,
            config.stream_path.as_deref(),
        )?;
        Ok(())
    })();

    // Cleanup runs regardless of the attempt's outcome, each step
    // independently so one failure cannot skip the rest.
    let mut session_id = None;
    if let Some(mut session) = session_slot.take() {
        session_id = session.id();
        if let Err(err) = session.destroy() {
            warn!(err = %err, "session destroy failed during cleanup");
        }
    }
    if let Err(err) = client.stop() {
        warn!(err = %err, "client stop failed during cleanup");
    }
    let kept_workspace = if caller_owned {
        None
    } else if config.preserve_workspace {
        info!(path = %workspace.path.display(), "workspace preserved");
        Some(workspace.path.clone())
    } else {
        workspace.remove_best_effort();
        None
    };

    attempt?;
    debug!(events = log.len(), early_terminated, "session resolved");
    Ok(SessionOutcome {
        events: log,
        early_terminated,
        session_id,
        workspace: kept_workspace,
    })
}

/// Submit the prompt and capture events until the run resolves.
///
/// Returns whether the halt predicate ended the run. The terminal idle
/// event is consumed, not stored.
fn drive<S: AgentSession>(
    session: &mut S,
    prompt: &str,
    halt: Option<&HaltFn>,
    log: &mut EventLog,
    stream_path: Option<&Path>,
) -> Result<bool> {
    let mut tee = stream_path.map(open_stream).transpose()?;

    session.send(prompt)?;
    loop {
        let Some(event) = session.next_event()? else {
            debug!("event stream closed");
            return Ok(false);
        };
        if let SessionEvent::Other { event_type, data } = &event
            && event_type == "session.error"
        {
            // Agent-reported errors are data, not run failures: the agent
            // keeps streaming and resolves with idle as usual.
            debug!(data = %data, "agent reported a session error");
        }
        if event.is_idle() {
            debug!("agent idle");
            return Ok(false);
        }

        if let Some(writer) = tee.as_mut()
            && let Err(err) = tee_event(writer, &event)
        {
            warn!(err = %err, "event stream tee failed");
            tee = None;
        }
        log.push(event);

        if halt.is_some_and(|predicate| predicate(log)) {
            info!(events = log.len(), "halt predicate fired, aborting session");
            if let Err(err) = session.abort() {
                warn!(err = %err, "session abort failed");
            }
            return Ok(true);
        }
    }
}

fn open_stream(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn tee_event(writer: &mut BufWriter<File>, event: &SessionEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("serialize event")?;
    writeln!(writer, "{line}").context("write event line")?;
    // Flush per event so observers see progress in real time.
    writer.flush().context("flush stream file")
}
