//! Decoding of the agent CLI's JSONL event stream.
//!
//! Each stdout line is a JSON object `{"type": "...", "data": {...}}`. Known
//! kinds decode into their [`SessionEvent`] variant; unknown kinds are kept
//! verbatim as [`SessionEvent::Other`]. Lines that are not JSON at all are
//! skipped, since agent CLIs interleave banners and progress noise with the
//! event stream.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::warn;

use crate::core::event::SessionEvent;

/// Outcome of decoding one stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(SessionEvent),
    /// Blank or non-JSON noise; not part of the event stream.
    Skipped,
}

/// Decode one line of agent stdout.
///
/// Known event kinds with missing required fields are errors: a completion
/// without a call id cannot be correlated and indicates a broken stream.
pub fn decode_line(line: &str) -> Result<Decoded> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Decoded::Skipped);
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(err = %err, "skipping non-JSON line on agent stdout");
            return Ok(Decoded::Skipped);
        }
    };
    decode_value(value).map(Decoded::Event)
}

/// Decode a parsed wire object into a typed event.
pub fn decode_value(value: Value) -> Result<SessionEvent> {
    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        return Err(anyhow!("event object missing 'type': {value}"));
    };
    let event_type = event_type.to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    let event = match event_type.as_str() {
        "assistant.message" => SessionEvent::MessageFull {
            message_id: required_str(&data, "messageId", &event_type)?,
            content: optional_str(&data, "content"),
        },
        "assistant.message_delta" => SessionEvent::MessageDelta {
            message_id: required_str(&data, "messageId", &event_type)?,
            delta: optional_str(&data, "deltaContent"),
        },
        "tool.execution_start" => SessionEvent::ToolStart {
            call_id: required_str(&data, "toolCallId", &event_type)?,
            tool_name: required_str(&data, "toolName", &event_type)?,
            arguments: data.get("arguments").cloned().unwrap_or(Value::Null),
        },
        "tool.execution_complete" => SessionEvent::ToolComplete {
            call_id: required_str(&data, "toolCallId", &event_type)?,
            success: data
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            error: data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "session.idle" => SessionEvent::Idle,
        _ => SessionEvent::Other { event_type, data },
    };
    Ok(event)
}

fn required_str(data: &Value, key: &str, event_type: &str) -> Result<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("{event_type} event missing '{key}'"))
}

fn optional_str(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_delta() {
        let decoded = decode_line(
            r#"{"type":"assistant.message_delta","data":{"messageId":"m1","deltaContent":"Hi"}}"#,
        )
        .expect("decode");
        assert_eq!(
            decoded,
            Decoded::Event(SessionEvent::MessageDelta {
                message_id: "m1".to_string(),
                delta: "Hi".to_string(),
            })
        );
    }

    #[test]
    fn decodes_tool_pair() {
        let start = decode_value(serde_json::json!({
            "type": "tool.execution_start",
            "data": {"toolCallId": "c1", "toolName": "shell", "arguments": {"command": "ls"}}
        }))
        .expect("start");
        assert_eq!(
            start,
            SessionEvent::ToolStart {
                call_id: "c1".to_string(),
                tool_name: "shell".to_string(),
                arguments: serde_json::json!({"command": "ls"}),
            }
        );

        let complete = decode_value(serde_json::json!({
            "type": "tool.execution_complete",
            "data": {"toolCallId": "c1", "success": true}
        }))
        .expect("complete");
        assert_eq!(
            complete,
            SessionEvent::ToolComplete {
                call_id: "c1".to_string(),
                success: true,
                error: None,
            }
        );
    }

    #[test]
    fn missing_success_defaults_to_failure() {
        let event = decode_value(serde_json::json!({
            "type": "tool.execution_complete",
            "data": {"toolCallId": "c1", "message": "network unreachable"}
        }))
        .expect("decode");
        assert_eq!(
            event,
            SessionEvent::ToolComplete {
                call_id: "c1".to_string(),
                success: false,
                error: Some("network unreachable".to_string()),
            }
        );
    }

    #[test]
    fn unknown_kind_becomes_other() {
        let event = decode_value(serde_json::json!({
            "type": "assistant.reasoning_delta",
            "data": {"deltaContent": "thinking"}
        }))
        .expect("decode");
        assert!(matches!(
            event,
            SessionEvent::Other { ref event_type, .. } if event_type == "assistant.reasoning_delta"
        ));
    }

    #[test]
    fn idle_decodes_without_data() {
        let decoded = decode_line(r#"{"type":"session.idle"}"#).expect("decode");
        assert_eq!(decoded, Decoded::Event(SessionEvent::Idle));
    }

    #[test]
    fn non_json_noise_is_skipped() {
        assert_eq!(
            decode_line("Welcome to the agent CLI").expect("decode"),
            Decoded::Skipped
        );
        assert_eq!(decode_line("   ").expect("decode"), Decoded::Skipped);
    }

    #[test]
    fn missing_call_id_is_an_error() {
        let err = decode_value(serde_json::json!({
            "type": "tool.execution_complete",
            "data": {"success": true}
        }))
        .expect_err("should fail");
        assert!(err.to_string().contains("toolCallId"));
    }
}
