use log::warn;

use crate::protocol::{ConversationUnit, FinishReason, Message, UnitStatus};

use super::linker::convert_tool_result_to_messages;

/// Groups a chronological message log into conversation units.
///
/// The log is linked first so that tool results are reachable from the ai
/// messages. A human message opens a unit; ai messages are appended to the
/// open unit, and the one carrying `finish_reason = stop` is marked
/// `is_last` and closes it. Tool messages are not appended.
///
/// A human message arriving while a unit is still open marks that unit
/// `Abandoned`. An ai message with no open unit is dropped with a warning.
pub fn convert_server_history_to_messages(log: &[Message]) -> Vec<ConversationUnit> {
    let linked = convert_tool_result_to_messages(log);
    let mut conversations: Vec<ConversationUnit> = Vec::new();
    let mut open = false;

    for msg in linked {
        match msg {
            Message::Human(_) => {
                if open {
                    if let Some(previous) = conversations.last_mut() {
                        previous.status = UnitStatus::Abandoned;
                    }
                }
                conversations.push(ConversationUnit::new(msg));
                open = true;
            }
            Message::Ai(mut ai) => {
                let Some(current) = conversations.last_mut().filter(|_| open) else {
                    warn!(
                        "[Segmenter] dropping ai message {:?} with no open conversation",
                        ai.id
                    );
                    continue;
                };
                let terminal = ai.finish_reason == Some(FinishReason::Stop);
                ai.is_last = terminal;
                current.messages.push(Message::Ai(ai));
                if terminal {
                    current.status = UnitStatus::Finished;
                    open = false;
                }
            }
            Message::Tool(_) => {}
        }
    }

    conversations
}
