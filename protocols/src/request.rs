//! The public `Request` entity (`spec.md` §3).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::item::Item;

/// Either a raw user string or an ordered sequence of typed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Items(Vec<Item>),
}

impl ResponseInput {
    pub fn is_empty(&self) -> bool {
        match self {
            ResponseInput::Text(s) => s.is_empty(),
            ResponseInput::Items(items) => items.is_empty(),
        }
    }
}

/// Tool choice policy: auto / none / required / a specific named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    #[serde(untagged)]
    Named(NamedToolChoice),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionToolDef {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub strict: bool,
}

/// A single entry of the request's `tools` array. Only the `function`
/// variant is interpreted by the engine itself; MCP and other executor
/// kinds are opaque to the protocol layer and passed through to the tool
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDef {
    Function(FunctionToolDef),
    Mcp {
        server_label: String,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    #[serde(other)]
    Other,
}

impl ToolDef {
    pub fn name(&self) -> Option<&str> {
        match self {
            ToolDef::Function(f) => Some(f.name.as_str()),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Sampling knobs, echoed verbatim where the backend supports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub top_logprobs: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// A conversation specification posted to `POST /v1/responses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: ResponseInput,
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default = "ToolChoice::default_value")]
    pub tool_choice: ToolChoice,
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
    pub max_tool_calls: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    pub previous_response_id: Option<String>,
    /// Tool names the engine is permitted to dispatch. Absent = allow all;
    /// an empty list is *also* treated as allow all (`spec.md` §9 open
    /// question — decided and tested, see DESIGN.md).
    pub allowed_tools: Option<Vec<String>>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    /// Opaque passthrough fields, preserved bit-faithfully on the wire.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub user: Option<String>,
    pub reasoning: Option<Value>,
    pub text: Option<Value>,
}

impl ToolChoice {
    fn default_value() -> Self {
        ToolChoice::Auto
    }
}

impl ResponsesRequest {
    pub fn allows_tool(&self, name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(list) if list.is_empty() => true,
            Some(list) => list.iter().any(|n| n == name),
        }
    }
}
