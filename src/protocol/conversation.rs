use serde::Serialize;

use super::Message;

/// Lifecycle of a conversation unit. Everything but `Loading` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Loading,
    Finished,
    /// A new human message arrived before the assistant reply finished.
    Abandoned,
    /// The backend reported an error or the transport failed mid-response.
    Failed,
    /// The stream was aborted by the caller.
    Cancelled,
}

impl UnitStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

/// One turn: a human message followed by the ai messages answering it.
/// Tool results are reachable through `tool_calls[].result` on the ai messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationUnit {
    pub messages: Vec<Message>,
    pub status: UnitStatus,
}

impl ConversationUnit {
    pub fn new(human: Message) -> Self {
        Self {
            messages: vec![human],
            status: UnitStatus::Loading,
        }
    }

    pub const fn is_open(&self) -> bool {
        matches!(self.status, UnitStatus::Loading)
    }

    pub fn prompt(&self) -> Option<&Message> {
        self.messages.first()
    }
}
