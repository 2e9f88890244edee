//! Reassembly of streamed assistant messages.
//!
//! Producers interleave full message snapshots with incremental deltas, all
//! keyed by message id. Aggregation is a pure fold over the log in arrival
//! order, so it can be re-run any number of times with identical results.

use crate::core::event::{EventLog, SessionEvent};

/// Fold message events into final content per message id.
///
/// The result is ordered by each id's first appearance, preserving arrival
/// order for order-sensitive consumers. Deltas append to whatever has
/// accumulated for their id (starting it if absent). A full snapshot
/// *replaces* any accumulated content for its id: producers re-synchronize
/// by emitting a fresh snapshot, so the last full message wins.
pub fn aggregate_messages(log: &EventLog) -> Vec<(String, String)> {
    let mut messages: Vec<(String, String)> = Vec::new();
    for event in log {
        match event {
            SessionEvent::MessageFull {
                message_id,
                content,
            } => {
                *slot(&mut messages, message_id) = content.clone();
            }
            SessionEvent::MessageDelta { message_id, delta } => {
                slot(&mut messages, message_id).push_str(delta);
            }
            _ => {}
        }
    }
    messages
}

/// Look up a final message by id in an aggregation result.
pub fn message_content<'a>(messages: &'a [(String, String)], id: &str) -> Option<&'a str> {
    messages
        .iter()
        .find(|(existing, _)| existing == id)
        .map(|(_, content)| content.as_str())
}

/// All final assistant message contents joined with newlines, in arrival
/// order of their ids.
pub fn assistant_text(log: &EventLog) -> String {
    aggregate_messages(log)
        .into_iter()
        .map(|(_, content)| content)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether any final assistant message contains `keyword`.
pub fn assistant_messages_contain(log: &EventLog, keyword: &str, case_sensitive: bool) -> bool {
    let messages = aggregate_messages(log);
    if case_sensitive {
        messages
            .iter()
            .any(|(_, content)| content.contains(keyword))
    } else {
        let keyword = keyword.to_lowercase();
        messages
            .iter()
            .any(|(_, content)| content.to_lowercase().contains(&keyword))
    }
}

fn slot<'a>(messages: &'a mut Vec<(String, String)>, id: &str) -> &'a mut String {
    let index = match messages.iter().position(|(existing, _)| existing == id) {
        Some(index) => index,
        None => {
            messages.push((id.to_string(), String::new()));
            messages.len() - 1
        }
    };
    &mut messages[index].1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(id: &str, fragment: &str) -> SessionEvent {
        SessionEvent::MessageDelta {
            message_id: id.to_string(),
            delta: fragment.to_string(),
        }
    }

    fn full(id: &str, content: &str) -> SessionEvent {
        SessionEvent::MessageFull {
            message_id: id.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn deltas_concatenate_in_arrival_order() {
        let log = EventLog::from(vec![delta("m1", "He"), delta("m1", "llo")]);
        let messages = aggregate_messages(&log);
        assert_eq!(message_content(&messages, "m1"), Some("Hello"));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let log = EventLog::from(vec![
            full("m1", "partial"),
            delta("m1", " more"),
            delta("m2", "other"),
        ]);
        let first = aggregate_messages(&log);
        let second = aggregate_messages(&log);
        assert_eq!(first, second);
    }

    #[test]
    fn message_order_follows_first_appearance_not_id() {
        let log = EventLog::from(vec![
            full("m3", "third id, first seen"),
            full("m1", "first id, second seen"),
            full("m2", "second id, third seen"),
        ]);
        let aggregated = aggregate_messages(&log);
        let ids: Vec<&str> = aggregated
            .iter()
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(ids, vec!["m3", "m1", "m2"]);
        assert_eq!(
            assistant_text(&log),
            "third id, first seen\nfirst id, second seen\nsecond id, third seen"
        );
    }

    #[test]
    fn late_full_snapshot_replaces_accumulated_deltas() {
        let log = EventLog::from(vec![
            delta("m1", "partial stream"),
            full("m1", "resynchronized"),
        ]);
        let messages = aggregate_messages(&log);
        assert_eq!(message_content(&messages, "m1"), Some("resynchronized"));
    }

    #[test]
    fn delta_after_full_appends_to_snapshot() {
        let log = EventLog::from(vec![full("m1", "Hello"), delta("m1", ", world")]);
        let messages = aggregate_messages(&log);
        assert_eq!(message_content(&messages, "m1"), Some("Hello, world"));
    }

    #[test]
    fn keyword_search_defaults_to_case_insensitive() {
        let log = EventLog::from(vec![full("m1", "Deployed to Production")]);
        assert!(assistant_messages_contain(&log, "production", false));
        assert!(!assistant_messages_contain(&log, "production", true));
        assert!(assistant_messages_contain(&log, "Production", true));
    }

    #[test]
    fn empty_log_yields_no_messages() {
        let log = EventLog::new();
        assert!(aggregate_messages(&log).is_empty());
        assert!(!assistant_messages_contain(&log, "anything", false));
    }
}
