pub mod conversation;
pub mod messages;
pub mod stream_event;

pub use conversation::{ConversationUnit, UnitStatus};
pub use messages::{
    decode_history, AiMessage, FinishReason, HumanMessage, Message, MessageDecodeError,
    ToolCall, ToolMessage,
};
pub use stream_event::{StreamEvent, StreamStatus};
