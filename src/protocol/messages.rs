use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One message of a conversation log, resolved from the backend's loosely
/// shaped wire object at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
#[serde(try_from = "WireMessage")]
pub enum Message {
    Human(HumanMessage),
    Ai(AiMessage),
    Tool(ToolMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Set on fragments decoded from `AIMessageChunk` or untyped loading
    /// chunks; cleared once the fragments are merged.
    #[serde(skip)]
    pub is_chunk: bool,
    /// Marks the message that closed its conversation unit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_last: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

/// A tool invocation requested by the assistant. `arguments` is the raw JSON
/// text as streamed; it is not parsed until someone asks for [`ToolCall::parsed_arguments`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageDecodeError {
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),
    #[error("tool message without tool_call_id")]
    MissingToolCallId,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human(HumanMessage {
            id: None,
            content: content.into(),
        })
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai(AiMessage {
            content: content.into(),
            ..Default::default()
        })
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool(ToolMessage {
            id: None,
            tool_call_id: tool_call_id.into(),
            name: None,
            content: content.into(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = Some(id.into());
        match &mut self {
            Self::Human(msg) => msg.id = id,
            Self::Ai(msg) => msg.id = id,
            Self::Tool(msg) => msg.id = id,
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Human(msg) => msg.id.as_deref(),
            Self::Ai(msg) => msg.id.as_deref(),
            Self::Tool(msg) => msg.id.as_deref(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human(msg) => &msg.content,
            Self::Ai(msg) => &msg.content,
            Self::Tool(msg) => &msg.content,
        }
    }

    pub fn content_mut(&mut self) -> &mut String {
        match self {
            Self::Human(msg) => &mut msg.content,
            Self::Ai(msg) => &mut msg.content,
            Self::Tool(msg) => &mut msg.content,
        }
    }

    pub const fn as_ai(&self) -> Option<&AiMessage> {
        match self {
            Self::Ai(msg) => Some(msg),
            _ => None,
        }
    }

    /// True for an ai message that carries the terminal `stop` marker.
    pub fn is_terminal(&self) -> bool {
        self.as_ai()
            .is_some_and(|msg| msg.finish_reason == Some(FinishReason::Stop))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content())
    }
}

impl ToolCall {
    /// Parses the accumulated argument text. Fails while the call is still streaming.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

// Wire shapes. The backend mixes LangChain serializations: final messages carry
// `tool_calls: [{id, name, args}]`, streaming chunks carry OpenAI-style
// fragments under `additional_kwargs`.

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    content: Option<Value>,
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    additional_kwargs: Option<WireAdditionalKwargs>,
    response_metadata: Option<WireResponseMetadata>,
    finish_reason: Option<FinishReason>,
    tool_call_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireAdditionalKwargs {
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCallFragment>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireResponseMetadata {
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    index: Option<u32>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Value,
    /// Present when re-reading a transcript this crate serialized.
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallFragment {
    id: Option<String>,
    index: Option<u32>,
    function: Option<WireFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunction {
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

impl TryFrom<WireMessage> for Message {
    type Error = MessageDecodeError;

    fn try_from(mut wire: WireMessage) -> Result<Self, Self::Error> {
        let content = wire.content.take().map(content_to_string).unwrap_or_default();
        let kind = wire.kind.take();

        match kind.as_deref() {
            Some("human") => Ok(Self::Human(HumanMessage {
                id: wire.id,
                content,
            })),
            Some("tool") => Ok(Self::Tool(ToolMessage {
                id: wire.id,
                tool_call_id: wire
                    .tool_call_id
                    .ok_or(MessageDecodeError::MissingToolCallId)?,
                name: wire.name,
                content,
            })),
            Some("ai") => Ok(Self::Ai(wire.into_ai(content, false))),
            Some("AIMessageChunk") | None => Ok(Self::Ai(wire.into_ai(content, true))),
            Some(other) => Err(MessageDecodeError::UnsupportedType(other.to_string())),
        }
    }
}

impl WireMessage {
    fn into_ai(self, content: String, is_chunk: bool) -> AiMessage {
        let kwargs = self.additional_kwargs.unwrap_or_default();
        let reasoning_content = self.reasoning_content.or(kwargs.reasoning_content);

        let tool_calls = match kwargs.tool_calls {
            Some(fragments) => fragments.into_iter().map(ToolCall::from).collect(),
            None => self.tool_calls.into_iter().map(ToolCall::from).collect(),
        };

        AiMessage {
            id: self.id,
            content,
            reasoning_content,
            tool_calls,
            finish_reason: self
                .response_metadata
                .and_then(|meta| meta.finish_reason)
                .or(self.finish_reason),
            is_chunk,
            is_last: false,
        }
    }
}

impl From<WireToolCallFragment> for ToolCall {
    fn from(fragment: WireToolCallFragment) -> Self {
        let function = fragment.function.unwrap_or_default();
        Self {
            id: fragment.id,
            index: fragment.index,
            name: function.name.unwrap_or_default(),
            arguments: function.arguments,
            result: None,
        }
    }
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        let arguments = call.arguments.unwrap_or_else(|| match call.args {
            Value::Null => String::new(),
            Value::String(text) => text,
            args => args.to_string(),
        });
        Self {
            id: call.id,
            index: call.index,
            name: call.name,
            arguments,
            result: None,
        }
    }
}

/// Flattens string or content-part-list content into plain text.
fn content_to_string(content: Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text),
                Value::Object(mut obj) => match obj.remove("text") {
                    Some(Value::String(text)) => Some(text),
                    _ => None,
                },
                _ => None,
            })
            .collect(),
        other => other.to_string(),
    }
}

/// Decodes a history log entry by entry, skipping entries that are not a
/// human, ai or tool message.
pub fn decode_history(entries: Vec<Value>) -> Vec<Message> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Message>(entry) {
            Ok(msg) => Some(msg),
            Err(e) => {
                log::warn!("[History] skipping entry: {e}");
                None
            }
        })
        .collect()
}
