//! The `Response` entity (`spec.md` §3).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Failed,
    Incomplete,
    Cancelled,
    /// A pending client-executed tool call is blocking completion; the
    /// caller is expected to resubmit with `function_call_output`s.
    RequiresAction,
}

impl ResponseStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseStatus::InProgress)
    }
}

/// Token usage, summed across every backend round. `spec.md` §3 invariant
/// (v): if any round omits usage, the total is still present but
/// best-effort.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteDetails {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub param: Option<String>,
}

impl From<&ApiError> for ResponseError {
    fn from(e: &ApiError) -> Self {
        ResponseError {
            error_type: e.kind.wire_type().to_string(),
            message: e.message.clone(),
            param: e.param.clone(),
        }
    }
}

/// The terminal and in-progress snapshot returned to the client, either as
/// a single JSON document or as the payload of `response.*` SSE events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: ResponseStatus,
    pub model: String,
    pub output: Vec<Item>,
    pub usage: Usage,
    pub error: Option<ResponseError>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub created_at: u64,
    pub previous_response_id: Option<String>,
    /// Opaque passthrough fields echoed from the request, preserved
    /// bit-faithfully (`spec.md` §9 "Passthrough fields").
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub user: Option<String>,
    pub reasoning: Option<Value>,
    pub text: Option<Value>,
}

impl Response {
    pub fn new(id: String, model: String, created_at: u64) -> Self {
        Response {
            id,
            status: ResponseStatus::InProgress,
            model,
            output: Vec::new(),
            usage: Usage::default(),
            error: None,
            incomplete_details: None,
            created_at,
            previous_response_id: None,
            metadata: Map::new(),
            user: None,
            reasoning: None,
            text: None,
        }
    }
}
