mod config;
pub mod conversation;
pub mod error;

pub use config::{Config, OutputConfig, OutputFormat, ScrollConfig, ServerConfig};
pub use conversation::{ConversationEngine, StreamOutcome};
pub use error::{ChatError, ErrorSink, LogErrorSink, Operation};
