pub mod cli;
pub mod client;
pub mod core;
pub mod ndjson;
pub mod processing;
pub mod protocol;
pub mod scroll;

pub use crate::core::{ChatError, Config, ConversationEngine, StreamOutcome};
pub use client::{AgentClient, HistorySource};
pub use protocol::{ConversationUnit, Message, StreamEvent, UnitStatus};
