//! `Item` and `ContentPart` — the unit of conversation output (`spec.md` §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

/// A sub-component of a `message` item. Parts are ordered and
/// content-indexed within their owning message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    OutputText { text: String },
    #[serde(other)]
    Reserved,
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::OutputText { text } => Some(text),
            ContentPart::Reserved => None,
        }
    }
}

/// A unit of conversation output. Every item carries a stable `id`, a
/// `status`, and the output index it was assigned at emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        id: String,
        status: ItemStatus,
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: String,
        status: ItemStatus,
        call_id: String,
        name: String,
        /// JSON-encoded arguments. Must parse as JSON once the item is
        /// `Completed` (`spec.md` §3 tool call buffer invariant).
        arguments: String,
    },
    FunctionCallOutput {
        id: String,
        status: ItemStatus,
        call_id: String,
        output: String,
        is_error: bool,
    },
    Reasoning {
        id: String,
        status: ItemStatus,
        text: String,
    },
}

impl Item {
    pub fn id(&self) -> &str {
        match self {
            Item::Message { id, .. }
            | Item::FunctionCall { id, .. }
            | Item::FunctionCallOutput { id, .. }
            | Item::Reasoning { id, .. } => id,
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Item::Message { status, .. }
            | Item::FunctionCall { status, .. }
            | Item::FunctionCallOutput { status, .. }
            | Item::Reasoning { status, .. } => *status,
        }
    }

    pub fn set_status(&mut self, new_status: ItemStatus) {
        match self {
            Item::Message { status, .. }
            | Item::FunctionCall { status, .. }
            | Item::FunctionCallOutput { status, .. }
            | Item::Reasoning { status, .. } => *status = new_status,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            Item::FunctionCall { call_id, .. } | Item::FunctionCallOutput { call_id, .. } => {
                Some(call_id)
            }
            _ => None,
        }
    }
}

/// Generates a stable, prefixed id the way the rest of the corpus does
/// (`mcp_...`, `fc_...`, `msg_...`).
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}
