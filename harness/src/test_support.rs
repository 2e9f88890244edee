//! Scripted agent doubles for tests.
//!
//! [`ScriptedClient`] replays predetermined event streams without spawning
//! processes, one script per created session, and records every interaction
//! so tests can assert on prompts, resume ids, aborts, and teardown.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::core::event::SessionEvent;
use crate::io::client::{AgentClient, AgentSession, AgentUnavailableError, SessionOptions};

/// What one scripted session should do.
#[derive(Debug, Clone)]
pub struct SessionScript {
    pub events: Vec<SessionEvent>,
    pub session_id: Option<String>,
    /// When set, `create_session` fails with [`AgentUnavailableError`].
    pub unavailable: Option<String>,
}

/// Builders for scripts and events, kept terse for test bodies.
pub mod script {
    use super::SessionScript;
    use crate::core::event::SessionEvent;

    pub fn events(events: Vec<SessionEvent>) -> SessionScript {
        SessionScript {
            events,
            session_id: None,
            unavailable: None,
        }
    }

    pub fn unavailable(reason: &str) -> SessionScript {
        SessionScript {
            events: Vec::new(),
            session_id: None,
            unavailable: Some(reason.to_string()),
        }
    }

    pub fn full(id: &str, content: &str) -> SessionEvent {
        SessionEvent::MessageFull {
            message_id: id.to_string(),
            content: content.to_string(),
        }
    }

    pub fn delta(id: &str, fragment: &str) -> SessionEvent {
        SessionEvent::MessageDelta {
            message_id: id.to_string(),
            delta: fragment.to_string(),
        }
    }

    pub fn tool_start(call_id: &str, tool: &str, args: serde_json::Value) -> SessionEvent {
        SessionEvent::ToolStart {
            call_id: call_id.to_string(),
            tool_name: tool.to_string(),
            arguments: args,
        }
    }

    pub fn tool_complete(call_id: &str, success: bool) -> SessionEvent {
        SessionEvent::ToolComplete {
            call_id: call_id.to_string(),
            success,
            error: None,
        }
    }
}

impl SessionScript {
    pub fn with_session_id(mut self, id: &str) -> Self {
        self.session_id = Some(id.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct SessionRecord {
    prompts: Vec<String>,
    aborted: bool,
    destroyed: bool,
}

/// Handle for asserting on one scripted session after the run consumed it.
#[derive(Clone)]
pub struct SessionProbe {
    record: Arc<Mutex<SessionRecord>>,
}

impl SessionProbe {
    pub fn prompts(&self) -> Vec<String> {
        self.record.lock().expect("lock").prompts.clone()
    }

    pub fn aborted(&self) -> bool {
        self.record.lock().expect("lock").aborted
    }

    pub fn destroyed(&self) -> bool {
        self.record.lock().expect("lock").destroyed
    }
}

struct ClientState {
    scripts: VecDeque<SessionScript>,
    sessions: Vec<SessionProbe>,
    options: Vec<SessionOptions>,
    stopped: bool,
}

/// Agent client replaying one [`SessionScript`] per created session.
pub struct ScriptedClient {
    state: Arc<Mutex<ClientState>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<SessionScript>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClientState {
                scripts: scripts.into(),
                sessions: Vec::new(),
                options: Vec::new(),
                stopped: false,
            })),
        }
    }

    /// Probe for the `index`th created session.
    pub fn session(&self, index: usize) -> SessionProbe {
        self.state.lock().expect("lock").sessions[index].clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().expect("lock").sessions.len()
    }

    /// Options every `create_session` call was given, in order.
    pub fn created_options(&self) -> Vec<SessionOptions> {
        self.state.lock().expect("lock").options.clone()
    }

    pub fn all_sessions_destroyed(&self) -> bool {
        let state = self.state.lock().expect("lock");
        !state.sessions.is_empty() && state.sessions.iter().all(SessionProbe::destroyed)
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().expect("lock").stopped
    }
}

impl AgentClient for ScriptedClient {
    type Session = ScriptedSession;

    fn create_session(&self, options: &SessionOptions) -> Result<Self::Session> {
        let mut state = self.state.lock().expect("lock");
        state.options.push(options.clone());
        let index = state.sessions.len();
        let script = state
            .scripts
            .pop_front()
            .ok_or_else(|| anyhow!("scripted client out of scripts"))?;
        if let Some(reason) = script.unavailable {
            return Err(anyhow!(AgentUnavailableError { reason }));
        }
        let record = Arc::new(Mutex::new(SessionRecord::default()));
        state.sessions.push(SessionProbe {
            record: Arc::clone(&record),
        });
        let session_id = script
            .session_id
            .or_else(|| Some(format!("scripted-{index}")));
        Ok(ScriptedSession {
            events: script.events.into(),
            session_id,
            record,
        })
    }

    fn stop(&self) -> Result<()> {
        self.state.lock().expect("lock").stopped = true;
        Ok(())
    }
}

/// Session double feeding scripted events in order.
pub struct ScriptedSession {
    events: VecDeque<SessionEvent>,
    session_id: Option<String>,
    record: Arc<Mutex<SessionRecord>>,
}

impl AgentSession for ScriptedSession {
    fn id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn send(&mut self, prompt: &str) -> Result<()> {
        self.record
            .lock()
            .expect("lock")
            .prompts
            .push(prompt.to_string());
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        Ok(self.events.pop_front())
    }

    fn abort(&mut self) -> Result<()> {
        self.record.lock().expect("lock").aborted = true;
        self.events.clear();
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.record.lock().expect("lock").destroyed = true;
        Ok(())
    }
}
