//! Agent client abstraction and the CLI-backed implementation.
//!
//! The [`AgentClient`]/[`AgentSession`] traits decouple session orchestration
//! from the actual agent backend. Tests use scripted clients that replay
//! predetermined event streams without spawning processes; production uses
//! [`CliAgentClient`], which drives the configured agent CLI over piped stdio
//! with JSONL events on stdout.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::event::SessionEvent;
use crate::io::config::HarnessConfig;
use crate::io::wire::{self, Decoded};

/// Whether the agent CLI can be used at all in this environment.
///
/// Probed once via an explicit initialization call so suites can skip
/// cleanly instead of failing every session mid-spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// The agent could not be started. Suites downcast to this to skip rather
/// than fail when the CLI is absent from the environment.
#[derive(Debug)]
pub struct AgentUnavailableError {
    pub reason: String,
}

impl std::fmt::Display for AgentUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent unavailable: {}", self.reason)
    }
}

impl std::error::Error for AgentUnavailableError {}

/// Parameters for creating one session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Working directory the agent operates in.
    pub workdir: PathBuf,
    /// Run without confirmation prompts.
    pub unattended: bool,
    /// Resume a previous session by id instead of starting fresh.
    pub resume: Option<String>,
    /// Directory of skill definitions exposed to the agent.
    pub skill_dir: Option<PathBuf>,
    /// Tool allow/deny configuration file.
    pub tool_config: Option<PathBuf>,
}

/// One live agent session: send prompts, pull typed events, tear down.
pub trait AgentSession {
    /// Backend-assigned session id, once known. Used to resume later turns.
    fn id(&self) -> Option<String>;

    /// Submit a prompt for the agent to work on.
    fn send(&mut self, prompt: &str) -> Result<()>;

    /// Pull the next event. `Ok(None)` means the stream closed (the agent
    /// process exited).
    fn next_event(&mut self) -> Result<Option<SessionEvent>>;

    /// Interrupt in-flight work. Best effort; the session must still be
    /// destroyable afterwards.
    fn abort(&mut self) -> Result<()>;

    /// Tear down the session and release its process resources.
    fn destroy(&mut self) -> Result<()>;
}

/// Factory for sessions against one agent backend.
pub trait AgentClient {
    type Session: AgentSession;

    fn create_session(&self, options: &SessionOptions) -> Result<Self::Session>;

    /// Release any client-level resources. Called once per run during
    /// cleanup; must be safe to call after sessions are destroyed.
    fn stop(&self) -> Result<()>;
}

/// Check whether the configured agent CLI responds at all.
#[instrument(skip_all)]
pub fn probe(config: &HarnessConfig) -> Availability {
    let Some(program) = config.agent.command.first() else {
        return Availability::Unavailable {
            reason: "agent.command is empty".to_string(),
        };
    };
    debug!(program, "probing agent CLI");
    let mut cmd = Command::new(program);
    cmd.args(&config.agent.command[1..])
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    match cmd.status() {
        Ok(status) if status.success() => Availability::Available,
        Ok(status) => Availability::Unavailable {
            reason: format!("{program} --version exited with status {:?}", status.code()),
        },
        Err(err) => Availability::Unavailable {
            reason: format!("failed to launch {program}: {err}"),
        },
    }
}

/// Client that spawns the configured agent CLI per session.
pub struct CliAgentClient {
    config: HarnessConfig,
}

impl CliAgentClient {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }
}

impl AgentClient for CliAgentClient {
    type Session = CliSession;

    #[instrument(skip_all, fields(workdir = %options.workdir.display(), resume = options.resume.is_some()))]
    fn create_session(&self, options: &SessionOptions) -> Result<Self::Session> {
        let agent = &self.config.agent;
        let program = agent
            .command
            .first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(&agent.command[1..])
            .arg("--model")
            .arg(&agent.model);
        if options.unattended {
            cmd.arg("--allow-all-tools").arg("--no-color");
        }
        if let Some(session_id) = &options.resume {
            cmd.arg("--resume").arg(session_id);
        }
        if let Some(skill_dir) = &options.skill_dir {
            cmd.arg("--skill-dir").arg(skill_dir);
        }
        if let Some(tool_config) = &options.tool_config {
            cmd.arg("--tool-config").arg(tool_config);
        }
        cmd.args(&agent.extra_args)
            .arg("--output-format")
            .arg("jsonl")
            .current_dir(&options.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning agent process");
        let mut child = cmd.spawn().map_err(|err| {
            anyhow!(AgentUnavailableError {
                reason: format!("failed to spawn {program}: {err}"),
            })
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let drain_tail = Arc::clone(&stderr_tail);
        let tail_limit = self.config.stderr_tail_limit_bytes;
        let stderr_drain = thread::spawn(move || drain_stderr(stderr, &drain_tail, tail_limit));

        info!("agent session started");
        Ok(CliSession {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr_drain: Some(stderr_drain),
            stderr_tail,
            session_id: options.resume.clone(),
            shutdown_grace: Duration::from_secs(self.config.shutdown_grace_secs),
            destroyed: false,
        })
    }

    fn stop(&self) -> Result<()> {
        // Sessions own their processes; nothing client-level to release.
        Ok(())
    }
}

/// A session backed by one agent CLI process.
pub struct CliSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr_drain: Option<thread::JoinHandle<()>>,
    stderr_tail: Arc<Mutex<String>>,
    session_id: Option<String>,
    shutdown_grace: Duration,
    destroyed: bool,
}

impl CliSession {
    fn stderr_excerpt(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.clone())
            .unwrap_or_default()
    }

    /// Capture the backend-assigned id from session-level events.
    fn observe(&mut self, event: &SessionEvent) {
        if let SessionEvent::Other { event_type, data } = event
            && event_type == "session.start"
            && let Some(id) = data.get("sessionId").and_then(Value::as_str)
        {
            self.session_id = Some(id.to_string());
        }
    }
}

impl AgentSession for CliSession {
    fn id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn send(&mut self, prompt: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("session stdin already closed"))?;
        stdin
            .write_all(prompt.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush())
            .with_context(|| format!("write prompt to agent; stderr: {}", self.stderr_excerpt()))
    }

    fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        loop {
            let mut line = String::new();
            let n = self
                .stdout
                .read_line(&mut line)
                .context("read agent stdout")?;
            if n == 0 {
                debug!("agent stdout closed");
                return Ok(None);
            }
            match wire::decode_line(&line)? {
                Decoded::Event(event) => {
                    self.observe(&event);
                    return Ok(Some(event));
                }
                Decoded::Skipped => continue,
            }
        }
    }

    fn abort(&mut self) -> Result<()> {
        warn!("aborting agent session");
        self.child.kill().context("kill agent process")
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        // Closing stdin asks a well-behaved agent to finish up.
        drop(self.stdin.take());

        match self
            .child
            .wait_timeout(self.shutdown_grace)
            .context("wait for agent process")?
        {
            Some(status) => debug!(exit_code = ?status.code(), "agent process exited"),
            None => {
                warn!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    "agent did not exit within grace period, killing"
                );
                self.child.kill().context("kill agent process")?;
                self.child.wait().context("wait agent after kill")?;
            }
        }

        if let Some(handle) = self.stderr_drain.take()
            && handle.join().is_err()
        {
            warn!("stderr drain thread panicked");
        }
        Ok(())
    }
}

impl Drop for CliSession {
    fn drop(&mut self) {
        if !self.destroyed {
            if let Err(err) = self.destroy() {
                warn!(err = %err, "session teardown failed in drop");
            }
        }
    }
}

/// Drain agent stderr so the pipe cannot block the child, keeping a bounded
/// tail for error context.
fn drain_stderr<R: Read>(stderr: R, tail: &Mutex<String>, limit: usize) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        debug!(target: "agent_stderr", "{line}");
        if let Ok(mut tail) = tail.lock() {
            tail.push_str(&line);
            tail.push('\n');
            if tail.len() > limit {
                // Round the cut forward so it never lands inside a
                // multibyte character.
                let mut cut = tail.len() - limit;
                while !tail.is_char_boundary(cut) {
                    cut += 1;
                }
                tail.drain(..cut);
            }
        }
    }
}
