use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::core::ChatError;
use crate::protocol::{decode_history, Message};

use super::HistorySource;

/// Reads a history log saved as either `{"history": [...]}` or a bare array.
#[derive(Debug, Clone)]
pub struct FileHistory {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Wrapped { history: Vec<Value> },
    Bare(Vec<Value>),
}

impl FileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistorySource for FileHistory {
    async fn fetch_history(&self) -> Result<Vec<Message>, ChatError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let entries = match serde_json::from_str::<HistoryFile>(&contents).map_err(|e| {
            ChatError::ResponseFormat(format!(
                "Invalid history file {}: {e}",
                self.path.display()
            ))
        })? {
            HistoryFile::Wrapped { history } | HistoryFile::Bare(history) => history,
        };
        Ok(decode_history(entries))
    }
}
