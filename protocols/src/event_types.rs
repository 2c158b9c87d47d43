//! Public SSE event catalogue (`spec.md` §4.5) and the internal provider
//! event kinds the Stream Translator emits (`spec.md` §4.1).

use serde::Serialize;
use serde_json::Value;

use crate::item::Item;
use crate::response::{Response, ResponseError, Usage};

/// One public event, tagged by `type`, every variant carrying the fields
/// `spec.md` §4.5 requires for that event kind. `sequence_number` is
/// attached separately by the emitter so the counter stays the emitter's
/// sole responsibility (`spec.md` §9 "Monotonic per-request counter").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublicEventKind {
    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: Item },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        output_index: usize,
        content_index: usize,
        item_id: String,
        part: Value,
    },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        output_index: usize,
        content_index: usize,
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        output_index: usize,
        content_index: usize,
        item_id: String,
        text: String,
    },

    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        output_index: usize,
        content_index: usize,
        item_id: String,
        part: Value,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        output_index: usize,
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        output_index: usize,
        item_id: String,
        arguments: String,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: usize, item: Item },

    #[serde(rename = "response.completed")]
    ResponseCompleted { response: Response },

    #[serde(rename = "response.failed")]
    ResponseFailed { response: Response },

    #[serde(rename = "response.cancelled")]
    ResponseCancelled { response: Response },

    #[serde(rename = "response.incomplete")]
    ResponseIncomplete { response: Response },

    #[serde(rename = "response.requires_action")]
    ResponseRequiresAction { response: Response },
}

impl PublicEventKind {
    /// Whether this variant is one of the five mutually-exclusive terminal
    /// events (`spec.md` §4.5 point 3 / §3 invariant (iv)).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublicEventKind::ResponseCompleted { .. }
                | PublicEventKind::ResponseFailed { .. }
                | PublicEventKind::ResponseCancelled { .. }
                | PublicEventKind::ResponseIncomplete { .. }
                | PublicEventKind::ResponseRequiresAction { .. }
        )
    }

    /// The bare event name used on the `event:` SSE line (without the
    /// `data:` JSON, which already carries `type`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            PublicEventKind::ResponseCreated { .. } => "response.created",
            PublicEventKind::OutputItemAdded { .. } => "response.output_item.added",
            PublicEventKind::ContentPartAdded { .. } => "response.content_part.added",
            PublicEventKind::OutputTextDelta { .. } => "response.output_text.delta",
            PublicEventKind::OutputTextDone { .. } => "response.output_text.done",
            PublicEventKind::ContentPartDone { .. } => "response.content_part.done",
            PublicEventKind::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            PublicEventKind::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            PublicEventKind::OutputItemDone { .. } => "response.output_item.done",
            PublicEventKind::ResponseCompleted { .. } => "response.completed",
            PublicEventKind::ResponseFailed { .. } => "response.failed",
            PublicEventKind::ResponseCancelled { .. } => "response.cancelled",
            PublicEventKind::ResponseIncomplete { .. } => "response.incomplete",
            PublicEventKind::ResponseRequiresAction { .. } => "response.requires_action",
        }
    }
}

/// A fully materialized public event, carrying the sequence number the
/// emitter assigned it.
#[derive(Debug, Clone, Serialize)]
pub struct PublicEvent {
    pub sequence_number: u64,
    #[serde(flatten)]
    pub kind: PublicEventKind,
}

/// Internal provider events produced by the Stream Translator
/// (`spec.md` §4.1). These never reach the wire directly; the engine and
/// emitter translate them into `PublicEventKind`s.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    TextDelta {
        text: String,
    },
    TextDone {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ReasoningDone {
        text: String,
    },
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    ToolCallDone {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },
    Done {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    Error {
        error: ResponseError,
    },
}
