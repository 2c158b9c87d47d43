//! Backend chat-completion wire types: the protocol spoken by upstream
//! chat-completion inference backends, both as a single JSON document and
//! as an SSE stream of chunks (`spec.md` §4.1, §4.2, Glossary
//! "Chat-completion backend").

use serde::{Deserialize, Serialize};

use crate::item::ItemStatus;
use crate::response::Usage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One `data: {json}` line of a backend SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// The non-streaming `/v1/chat/completions` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

/// Maps a backend `finish_reason` to an `Item.status`
/// (`spec.md` §4.1 chunk mapping rules, shared with §4.2 `Complete`).
/// Returns `(status, warning)`; `warning` is `Some` for an unrecognized
/// reason, mapped liberally to `Completed` per `spec.md` §9.
pub fn finish_reason_to_status(reason: &str) -> (ItemStatus, Option<&'static str>) {
    match reason {
        "stop" => (ItemStatus::Completed, None),
        "length" => (ItemStatus::Incomplete, None),
        "tool_calls" => (ItemStatus::Completed, None),
        "content_filter" => (ItemStatus::Incomplete, None),
        _ => (ItemStatus::Completed, Some("unrecognized finish_reason")),
    }
}
