pub mod file;
pub mod http;

use async_trait::async_trait;

use crate::core::ChatError;
use crate::protocol::Message;

pub use file::FileHistory;
pub use http::{AgentClient, ThreadHistory};

/// Supplies the authoritative message log the engine reconciles against once
/// a response has finished.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<Message>, ChatError>;
}

/// A fixed log, for replays and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory(pub Vec<Message>);

#[async_trait]
impl HistorySource for StaticHistory {
    async fn fetch_history(&self) -> Result<Vec<Message>, ChatError> {
        Ok(self.0.clone())
    }
}
