use crate::protocol::{AiMessage, Message, ToolCall};

/// Reduces the chunks of one streamed message, in arrival order, into a single
/// message.
///
/// The first chunk is the seed. Every later chunk appends its `content` and
/// `reasoning_content` and contributes tool-call fragments. The merge preserves
/// order, it does not correct it: feeding `["lo", "Hel"]` yields `"loHel"`.
pub fn merge_message_chunk(chunks: &[Message]) -> Option<Message> {
    let (seed, rest) = chunks.split_first()?;
    let mut result = seed.clone();

    for chunk in rest {
        result.content_mut().push_str(chunk.content());

        if let (Message::Ai(target), Message::Ai(fragment)) = (&mut result, chunk) {
            merge_ai_fragment(target, fragment);
        }
    }

    if let Message::Ai(msg) = &mut result {
        msg.is_chunk = false;
    }

    Some(result)
}

fn merge_ai_fragment(target: &mut AiMessage, fragment: &AiMessage) {
    if let Some(reasoning) = fragment.reasoning_content.as_deref() {
        target
            .reasoning_content
            .get_or_insert_with(String::new)
            .push_str(reasoning);
    }

    for call in &fragment.tool_calls {
        merge_tool_call(&mut target.tool_calls, call);
    }

    if fragment.finish_reason.is_some() {
        target.finish_reason = fragment.finish_reason;
    }
}

/// Attributes one tool-call fragment to the call it belongs to.
///
/// A fragment is matched by `id` first. The `index` fallback only applies when
/// one side has no `id` yet, so a call with a new id is never folded into an
/// unrelated call that happens to share its index.
fn merge_tool_call(calls: &mut Vec<ToolCall>, fragment: &ToolCall) {
    let by_id = fragment
        .id
        .as_deref()
        .and_then(|id| calls.iter().position(|c| c.id.as_deref() == Some(id)));

    let position = by_id.or_else(|| {
        let index = fragment.index?;
        calls.iter().position(|c| {
            c.index == Some(index) && (fragment.id.is_none() || c.id.is_none())
        })
    });

    match position {
        Some(pos) => {
            let existing = &mut calls[pos];
            existing.arguments.push_str(&fragment.arguments);
            if existing.id.is_none() {
                existing.id.clone_from(&fragment.id);
            }
            if existing.name.is_empty() {
                existing.name.clone_from(&fragment.name);
            }
        }
        None => calls.push(fragment.clone()),
    }
}
