use std::collections::HashMap;

use crate::protocol::{Message, ToolMessage};

/// Attaches each tool message to the tool call that requested it.
///
/// Builds a `tool_call_id -> tool message` map in one pass, then returns a
/// copy of the log where every ai tool call has `result` set from the map, or
/// `None` while the tool is still running. Tool messages stay in the log.
/// Results are assigned, never appended, so running it again on its own
/// output changes nothing.
pub fn convert_tool_result_to_messages(log: &[Message]) -> Vec<Message> {
    let results: HashMap<&str, &ToolMessage> = log
        .iter()
        .filter_map(|msg| match msg {
            Message::Tool(tool) => Some((tool.tool_call_id.as_str(), tool)),
            _ => None,
        })
        .collect();

    log.iter()
        .map(|msg| match msg {
            Message::Ai(ai) if !ai.tool_calls.is_empty() => {
                let mut linked = ai.clone();
                for call in &mut linked.tool_calls {
                    call.result = call
                        .id
                        .as_deref()
                        .and_then(|id| results.get(id))
                        .map(|tool| (*tool).clone());
                }
                Message::Ai(linked)
            }
            other => other.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AiMessage, ToolCall};

    fn ai_with_calls(ids: &[&str]) -> Message {
        Message::Ai(AiMessage {
            id: Some("a1".to_string()),
            tool_calls: ids
                .iter()
                .map(|id| ToolCall {
                    id: Some((*id).to_string()),
                    name: "calculator".to_string(),
                    arguments: "{}".to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_results_attached_by_call_id() {
        let log = vec![
            Message::human("1+1?"),
            ai_with_calls(&["call_1", "call_2"]),
            Message::tool("2", "call_1"),
        ];
        let linked = convert_tool_result_to_messages(&log);

        assert_eq!(linked.len(), 3, "tool messages stay in the log");
        let calls = &linked[1].as_ai().expect("ai").tool_calls;
        assert_eq!(calls[0].result.as_ref().map(|r| r.content.as_str()), Some("2"));
        assert!(calls[1].result.is_none(), "call_2 is still running");
    }

    #[test]
    fn test_linking_is_idempotent() {
        let log = vec![
            Message::human("q"),
            ai_with_calls(&["call_1"]),
            Message::tool("done", "call_1"),
        ];
        let once = convert_tool_result_to_messages(&log);
        let twice = convert_tool_result_to_messages(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let log = vec![ai_with_calls(&["call_1"]), Message::tool("ok", "call_1")];
        let _ = convert_tool_result_to_messages(&log);
        assert!(log[0].as_ai().expect("ai").tool_calls[0].result.is_none());
    }
}
