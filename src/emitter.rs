//! Public Event Emitter (`spec.md` §4.5): owns the monotonic
//! `sequence_number` counter and the per-item event ordering, and is the
//! only component allowed to number events. Exactly one terminal event is
//! ever produced per response.

use async_trait::async_trait;
use serde_json::json;

use antwort_protocol::{ApiError, ContentPart, Item, PublicEvent, PublicEventKind, Response};

/// Where the emitter writes numbered events. A send failure — the HTTP
/// client disconnected, or the underlying transport is gone — is treated
/// as a flush error: the caller should seal the response as
/// `response.cancelled` rather than keep computing on behalf of nobody
/// (`spec.md` §4.5 "flush-after-every-event").
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: PublicEvent) -> Result<(), ApiError>;
}

/// Numbers and orders public events. Holds no response state of its own;
/// the engine tells it what happened, in the order it happened.
pub struct Emitter<'a> {
    next_seq: u64,
    sink: &'a mut dyn EventSink,
}

impl<'a> Emitter<'a> {
    pub fn new(sink: &'a mut dyn EventSink) -> Self {
        Self { next_seq: 0, sink }
    }

    fn next(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn emit(&mut self, kind: PublicEventKind) -> Result<(), ApiError> {
        let sequence_number = self.next();
        self.sink.send(PublicEvent { sequence_number, kind }).await
    }

    pub async fn response_created(&mut self, response: &Response) -> Result<(), ApiError> {
        self.emit(PublicEventKind::ResponseCreated {
            response: response.clone(),
        })
        .await
    }

    pub async fn output_item_added(&mut self, output_index: usize, item: &Item) -> Result<(), ApiError> {
        self.emit(PublicEventKind::OutputItemAdded {
            output_index,
            item: item.clone(),
        })
        .await
    }

    pub async fn output_item_done(&mut self, output_index: usize, item: &Item) -> Result<(), ApiError> {
        self.emit(PublicEventKind::OutputItemDone {
            output_index,
            item: item.clone(),
        })
        .await
    }

    /// Message item lifecycle: `content_part.added` → `output_text.delta`*
    /// → `output_text.done` → `content_part.done` (`spec.md` §4.5 point 2).
    pub async fn content_part_added(
        &mut self,
        output_index: usize,
        content_index: usize,
        item_id: &str,
    ) -> Result<(), ApiError> {
        self.emit(PublicEventKind::ContentPartAdded {
            output_index,
            content_index,
            item_id: item_id.to_string(),
            part: json!({"type": "output_text", "text": ""}),
        })
        .await
    }

    pub async fn output_text_delta(
        &mut self,
        output_index: usize,
        content_index: usize,
        item_id: &str,
        delta: &str,
    ) -> Result<(), ApiError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.emit(PublicEventKind::OutputTextDelta {
            output_index,
            content_index,
            item_id: item_id.to_string(),
            delta: delta.to_string(),
        })
        .await
    }

    pub async fn output_text_done(
        &mut self,
        output_index: usize,
        content_index: usize,
        item_id: &str,
        text: &str,
    ) -> Result<(), ApiError> {
        self.emit(PublicEventKind::OutputTextDone {
            output_index,
            content_index,
            item_id: item_id.to_string(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn content_part_done(
        &mut self,
        output_index: usize,
        content_index: usize,
        item_id: &str,
        text: &str,
    ) -> Result<(), ApiError> {
        self.emit(PublicEventKind::ContentPartDone {
            output_index,
            content_index,
            item_id: item_id.to_string(),
            part: json!({"type": "output_text", "text": text}),
        })
        .await
    }

    /// Function-call item lifecycle: `function_call_arguments.delta`* →
    /// `function_call_arguments.done` (`spec.md` §4.5 point 2).
    pub async fn function_call_arguments_delta(
        &mut self,
        output_index: usize,
        item_id: &str,
        delta: &str,
    ) -> Result<(), ApiError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.emit(PublicEventKind::FunctionCallArgumentsDelta {
            output_index,
            item_id: item_id.to_string(),
            delta: delta.to_string(),
        })
        .await
    }

    pub async fn function_call_arguments_done(
        &mut self,
        output_index: usize,
        item_id: &str,
        arguments: &str,
    ) -> Result<(), ApiError> {
        self.emit(PublicEventKind::FunctionCallArgumentsDone {
            output_index,
            item_id: item_id.to_string(),
            arguments: arguments.to_string(),
        })
        .await
    }

    /// Emits the single terminal event for this response
    /// (`spec.md` §3 invariant (iv), §4.5 point 3). Panics if `response`'s
    /// status is not terminal — the engine must seal the response first.
    pub async fn terminal(&mut self, response: &Response) -> Result<(), ApiError> {
        use antwort_protocol::ResponseStatus::*;
        let kind = match response.status {
            Completed => PublicEventKind::ResponseCompleted {
                response: response.clone(),
            },
            Failed => PublicEventKind::ResponseFailed {
                response: response.clone(),
            },
            Cancelled => PublicEventKind::ResponseCancelled {
                response: response.clone(),
            },
            Incomplete => PublicEventKind::ResponseIncomplete {
                response: response.clone(),
            },
            RequiresAction => PublicEventKind::ResponseRequiresAction {
                response: response.clone(),
            },
            InProgress => unreachable!("terminal() called with a non-terminal response status"),
        };
        self.emit(kind).await
    }
}

/// Renders a single output-text message item's content, used by the
/// engine to avoid duplicating the "find the first output_text part"
/// lookup in more than one place.
pub fn first_text(item: &Item) -> Option<&str> {
    match item {
        Item::Message { content, .. } => content.first().and_then(ContentPart::text),
        _ => None,
    }
}
