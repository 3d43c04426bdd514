use serde::Deserialize;

use super::Message;

/// Lifecycle marker of one NDJSON record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Init,
    Loading,
    Error,
    Finished,
    #[serde(other)]
    Unknown,
}

/// One line of the agent response body. Absent fields stay `None`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEvent {
    pub status: StreamStatus,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub msg: Option<Message>,
    /// Human-readable error text on `status: error`.
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamEvent {
    pub fn init(request_id: impl Into<String>, msg: Message) -> Self {
        Self {
            status: StreamStatus::Init,
            request_id: Some(request_id.into()),
            msg: Some(msg),
            message: None,
        }
    }

    pub const fn loading(msg: Message) -> Self {
        Self {
            status: StreamStatus::Loading,
            request_id: None,
            msg: Some(msg),
            message: None,
        }
    }

    pub const fn finished() -> Self {
        Self {
            status: StreamStatus::Finished,
            request_id: None,
            msg: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StreamStatus::Error,
            request_id: None,
            msg: None,
            message: Some(message.into()),
        }
    }
}
