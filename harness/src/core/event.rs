//! Session events and the append-only event log.
//!
//! One [`SessionEvent`] is recorded per notification received from the
//! supervised agent, in arrival order. Each variant carries only the fields
//! that exist for that kind, so a completion without a call id (for example)
//! is unrepresentable.

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A single typed notification produced during a session.
///
/// Events are immutable once appended. The terminal idle signal is modeled as
/// [`SessionEvent::Idle`] but is never stored in a log; the session manager
/// consumes it as the natural end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A complete assistant message snapshot for one message id.
    MessageFull { message_id: String, content: String },
    /// An incremental fragment of the assistant message with this id.
    MessageDelta { message_id: String, delta: String },
    /// The agent started a tool invocation.
    ToolStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolComplete {
        call_id: String,
        success: bool,
        error: Option<String>,
    },
    /// The agent has no further work for the current prompt.
    Idle,
    /// Any event kind this harness does not interpret (reasoning deltas,
    /// lifecycle notices, provider extensions). Kept verbatim so detectors
    /// and reports can still see it.
    Other {
        event_type: String,
        data: serde_json::Value,
    },
}

impl SessionEvent {
    /// True for the terminal idle signal.
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionEvent::Idle)
    }
}

/// Ordered, append-only record of one session run.
///
/// The session manager is the only writer while a run is live; afterwards the
/// log is handed to callers by value and read through `iter`. There is no API
/// for removing or reordering events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<SessionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event. Arrival order is the only order.
    pub fn push(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Append every event of `other`, preserving its arrival order.
    pub fn extend_from(&mut self, other: &EventLog) {
        self.events.extend(other.events.iter().cloned());
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SessionEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize as JSONL, one event per line.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut buf = String::new();
        for event in &self.events {
            buf.push_str(&serde_json::to_string(event).context("serialize event")?);
            buf.push('\n');
        }
        Ok(buf)
    }

    /// Read a log back from JSONL produced by [`EventLog::to_jsonl`].
    pub fn from_jsonl<R: BufRead>(reader: R) -> Result<EventLog> {
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.context("read event line")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: SessionEvent = serde_json::from_str(&line)
                .with_context(|| format!("parse event on line {}", index + 1))?;
            events.push(event);
        }
        Ok(EventLog::from(events))
    }
}

impl From<Vec<SessionEvent>> for EventLog {
    fn from(events: Vec<SessionEvent>) -> Self {
        Self { events }
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a SessionEvent;
    type IntoIter = std::slice::Iter<'a, SessionEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_round_trips_every_kind() {
        let log = EventLog::from(vec![
            SessionEvent::MessageFull {
                message_id: "m1".to_string(),
                content: "hello".to_string(),
            },
            SessionEvent::MessageDelta {
                message_id: "m1".to_string(),
                delta: " world".to_string(),
            },
            SessionEvent::ToolStart {
                call_id: "c1".to_string(),
                tool_name: "shell".to_string(),
                arguments: serde_json::json!({"command": "ls"}),
            },
            SessionEvent::ToolComplete {
                call_id: "c1".to_string(),
                success: true,
                error: None,
            },
            SessionEvent::Other {
                event_type: "session.error".to_string(),
                data: serde_json::json!({"message": "boom"}),
            },
        ]);

        let jsonl = log.to_jsonl().expect("to jsonl");
        let restored = EventLog::from_jsonl(jsonl.as_bytes()).expect("from jsonl");
        assert_eq!(restored, log);
    }

    #[test]
    fn from_jsonl_skips_blank_lines() {
        let input = "\n{\"kind\":\"idle\"}\n\n";
        let log = EventLog::from_jsonl(input.as_bytes()).expect("parse");
        assert_eq!(log.len(), 1);
        assert!(log.iter().next().expect("event").is_idle());
    }

    #[test]
    fn extend_from_preserves_order() {
        let mut aggregate = EventLog::from(vec![SessionEvent::MessageDelta {
            message_id: "a".to_string(),
            delta: "1".to_string(),
        }]);
        let turn = EventLog::from(vec![SessionEvent::MessageDelta {
            message_id: "a".to_string(),
            delta: "2".to_string(),
        }]);

        aggregate.extend_from(&turn);
        let deltas: Vec<&str> = aggregate
            .iter()
            .map(|event| match event {
                SessionEvent::MessageDelta { delta, .. } => delta.as_str(),
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(deltas, vec!["1", "2"]);
    }
}
