//! Response Engine (`spec.md` §4.4): the agentic loop. Builds backend
//! requests, drives them through the Stream Translator regardless of
//! whether the end client asked for SSE, dispatches tool rounds through
//! the registry, and seals the response into exactly one terminal state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{warn, Instrument};

use antwort_protocol::chunk::finish_reason_to_status;
use antwort_protocol::item::generate_id;
use antwort_protocol::{
    ApiError, ContentPart, Item, ItemStatus, ProviderEvent, PublicEvent, Response,
    ResponseError, ResponseStatus, ResponsesRequest, IncompleteDetails,
};
use antwort_tools::{PendingCall, ToolExecutorRegistry};

use crate::backend::{build_backend_request, BackendAdapter, ModelRemap};
use crate::cancel::InFlightRegistry;
use crate::emitter::{Emitter, EventSink};
use crate::observability::metric_names;
use crate::store::ResponseStore;

/// A sink that discards every event: used when the client did not request
/// `stream: true`. The engine still drives the internal stream translator
/// and agentic loop identically; only delivery differs.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn send(&mut self, _event: PublicEvent) -> Result<(), ApiError> {
        Ok(())
    }
}

enum Seal {
    Completed,
    Incomplete(String),
    Failed(ApiError),
    Cancelled,
    RequiresAction,
}

#[derive(Default)]
struct RoundState {
    message_idx: Option<usize>,
    reasoning_text: String,
    tool_idx: std::collections::BTreeMap<usize, usize>,
    pending_calls: Vec<PendingCall>,
    finish_reason: Option<String>,
    stream_error: Option<ResponseError>,
}

pub struct Engine {
    backend: Arc<dyn BackendAdapter>,
    tools: Arc<ToolExecutorRegistry>,
    store: Arc<dyn ResponseStore>,
    in_flight: Arc<InFlightRegistry>,
    model_remap: ModelRemap,
    max_rounds: u32,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn BackendAdapter>,
        tools: Arc<ToolExecutorRegistry>,
        store: Arc<dyn ResponseStore>,
        in_flight: Arc<InFlightRegistry>,
        model_remap: ModelRemap,
        max_rounds: u32,
    ) -> Self {
        Self {
            backend,
            tools,
            store,
            in_flight,
            model_remap,
            max_rounds,
        }
    }

    pub async fn cancel(&self, response_id: &str) -> bool {
        self.in_flight.cancel(response_id)
    }

    pub async fn get(&self, id: &str) -> Option<Response> {
        self.store.get(id).await
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.store.delete(id).await
    }

    pub async fn list(&self) -> Vec<Response> {
        self.store.list().await
    }

    pub async fn get_input_items(&self, id: &str) -> Option<Vec<Item>> {
        self.store.get_input_items(id).await
    }

    pub async fn backend_list_models(&self) -> Result<Vec<crate::backend::ModelInfo>, ApiError> {
        self.backend.list_models().await
    }

    fn validate(&self, req: &ResponsesRequest) -> Result<(), ApiError> {
        if req.model.trim().is_empty() {
            return Err(ApiError::invalid_request("model must not be empty").with_param("model"));
        }
        if req.input.is_empty() && req.previous_response_id.is_none() {
            return Err(ApiError::invalid_request("input must not be empty").with_param("input"));
        }
        if let Some(tools) = &req.tools {
            for tool in tools {
                if let antwort_protocol::ToolDef::Function(f) = tool {
                    if f.name.trim().is_empty() {
                        return Err(ApiError::invalid_request("tool function name must not be empty")
                            .with_param("tools"));
                    }
                }
            }
        }

        let capabilities = self.backend.capabilities();
        if req.stream && !capabilities.streaming {
            return Err(
                ApiError::invalid_request("backend does not support streaming").with_param("stream")
            );
        }
        if req.tools.as_ref().is_some_and(|t| !t.is_empty()) && !capabilities.tool_calling {
            return Err(
                ApiError::invalid_request("backend does not support tool calling").with_param("tools")
            );
        }
        if req.reasoning.is_some() && !capabilities.reasoning {
            return Err(ApiError::invalid_request("backend does not support reasoning")
                .with_param("reasoning"));
        }
        Ok(())
    }

    #[tracing::instrument(
        skip(self, req, sink),
        fields(model = %req.model, response_id = tracing::field::Empty)
    )]
    pub async fn create_response(
        &self,
        req: ResponsesRequest,
        sink: &mut dyn EventSink,
    ) -> Result<Response, ApiError> {
        self.validate(&req)?;

        let mut full_history: Vec<Item> = Vec::new();
        if let Some(prev_id) = &req.previous_response_id {
            let prior = self.store.get_for_chain(prev_id).await?;
            full_history = prior.output;
        }

        let id = generate_id("resp");
        tracing::Span::current().record("response_id", id.as_str());
        let start = std::time::Instant::now();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let cancel_token = self.in_flight.register(&id);

        let mut response = Response::new(id.clone(), req.model.clone(), created_at);
        response.previous_response_id = req.previous_response_id.clone();
        response.metadata = req.metadata.clone();
        response.user = req.user.clone();
        response.reasoning = req.reasoning.clone();
        response.text = req.text.clone();

        let mut emitter = Emitter::new(sink);
        if let Err(e) = emitter.response_created(&response).await {
            self.in_flight.unregister(&id);
            return Err(e);
        }
        metrics::counter!(metric_names::RESPONSES_CREATED).increment(1);

        let mut new_output: Vec<Item> = Vec::new();
        let mut total_tool_calls: u32 = 0;
        let mut round: u32 = 0;

        let seal = 'rounds: loop {
            if cancel_token.is_cancelled() {
                break 'rounds Seal::Cancelled;
            }
            if round >= self.max_rounds {
                break 'rounds Seal::Incomplete("max_rounds_exceeded".to_string());
            }
            round += 1;
            metrics::counter!(metric_names::BACKEND_ROUNDS).increment(1);

            let round_span = tracing::info_span!("backend_round", response_id = %id, round);
            let round_result = async {
                let backend_req = build_backend_request(&req, &full_history, &self.model_remap);
                let mut rx = match self.backend.stream(&backend_req, cancel_token.clone()).await {
                    Ok(rx) => rx,
                    Err(e) => return Err(Seal::Failed(e)),
                };

                let round_start = new_output.len();
                let mut state = RoundState::default();

                while let Some(event) = rx.recv().await {
                    if let Err(e) = self
                        .apply_event(event, &mut new_output, &mut state, &mut emitter, &mut response)
                        .await
                    {
                        return Err(Seal::Failed(e));
                    }
                }

                if cancel_token.is_cancelled() {
                    return Err(Seal::Cancelled);
                }
                if let Some(err) = state.stream_error {
                    return Err(Seal::Failed(ApiError::server_error(err.message)));
                }
                let Some(finish_reason) = state.finish_reason.clone() else {
                    return Err(Seal::Failed(ApiError::server_error(
                        "backend stream ended without a finish reason",
                    )));
                };

                if let Err(e) = self
                    .finalize_round(&finish_reason, &mut new_output, &mut state, &mut emitter)
                    .await
                {
                    return Err(Seal::Failed(e));
                }

                full_history.extend(new_output[round_start..].iter().cloned());
                Ok((finish_reason, state))
            }
            .instrument(round_span)
            .await;

            let (finish_reason, state) = match round_result {
                Ok(v) => v,
                Err(seal) => break 'rounds seal,
            };

            if finish_reason == "tool_calls" && !state.pending_calls.is_empty() {
                if let Some(max) = req.max_tool_calls {
                    if total_tool_calls + state.pending_calls.len() as u32 > max {
                        break 'rounds Seal::Incomplete("max_tool_calls_exceeded".to_string());
                    }
                }

                let tool_span = tracing::info_span!(
                    "tool_dispatch",
                    response_id = %id,
                    round,
                    calls = state.pending_calls.len()
                );
                let outcome = self
                    .tools
                    .run_round(
                        state.pending_calls,
                        req.allowed_tools.as_deref(),
                        req.parallel_tool_calls,
                    )
                    .instrument(tool_span)
                    .await;
                total_tool_calls += outcome.outputs.len() as u32;
                metrics::counter!(metric_names::TOOL_CALLS).increment(outcome.outputs.len() as u64);

                for result in &outcome.outputs {
                    let item = Item::FunctionCallOutput {
                        id: generate_id("fco"),
                        status: ItemStatus::Completed,
                        call_id: result.call_id.clone(),
                        output: result.output.clone(),
                        is_error: result.is_error,
                    };
                    let idx = new_output.len();
                    new_output.push(item);
                    if let Err(e) = emitter.output_item_added(idx, &new_output[idx]).await {
                        break 'rounds Seal::Failed(e);
                    }
                    if let Err(e) = emitter.output_item_done(idx, &new_output[idx]).await {
                        break 'rounds Seal::Failed(e);
                    }
                    full_history.push(new_output[idx].clone());
                }

                if !outcome.unclaimed.is_empty() {
                    break 'rounds Seal::RequiresAction;
                }
                continue;
            }

            let (_, warning) = finish_reason_to_status(&finish_reason);
            if let Some(warning) = warning {
                warn!(response_id = %id, finish_reason, warning, "unrecognized finish_reason");
            }
            match finish_reason.as_str() {
                "length" | "content_filter" => {
                    break 'rounds Seal::Incomplete(format!("finish_reason:{finish_reason}"));
                }
                _ => break 'rounds Seal::Completed,
            }
        };

        self.in_flight.unregister(&id);
        response.output = new_output;
        match seal {
            Seal::Completed => {
                response.status = ResponseStatus::Completed;
                metrics::counter!(metric_names::RESPONSES_COMPLETED).increment(1);
            }
            Seal::Incomplete(reason) => {
                response.status = ResponseStatus::Incomplete;
                response.incomplete_details = Some(IncompleteDetails { reason });
            }
            Seal::Failed(err) => {
                response.status = ResponseStatus::Failed;
                response.error = Some(ResponseError::from(&err));
                metrics::counter!(metric_names::RESPONSES_FAILED).increment(1);
            }
            Seal::Cancelled => {
                response.status = ResponseStatus::Cancelled;
                metrics::counter!(metric_names::RESPONSES_CANCELLED).increment(1);
            }
            Seal::RequiresAction => response.status = ResponseStatus::RequiresAction,
        }
        metrics::histogram!(metric_names::RESPONSE_DURATION).record(start.elapsed().as_secs_f64());

        if let Err(e) = self.store.save(&response).await {
            warn!(response_id = %response.id, error = %e, "failed to persist response");
        }
        if let Err(e) = emitter.terminal(&response).await {
            warn!(response_id = %response.id, error = %e, "failed to deliver terminal event");
        }

        Ok(response)
    }

    async fn apply_event(
        &self,
        event: ProviderEvent,
        new_output: &mut Vec<Item>,
        state: &mut RoundState,
        emitter: &mut Emitter<'_>,
        response: &mut Response,
    ) -> Result<(), ApiError> {
        match event {
            ProviderEvent::TextDelta { text } => {
                if state.message_idx.is_none() {
                    let item = Item::Message {
                        id: generate_id("msg"),
                        status: ItemStatus::InProgress,
                        role: "assistant".to_string(),
                        content: vec![ContentPart::OutputText { text: String::new() }],
                    };
                    let idx = new_output.len();
                    new_output.push(item);
                    state.message_idx = Some(idx);
                    emitter.output_item_added(idx, &new_output[idx]).await?;
                    let item_id = new_output[idx].id().to_string();
                    emitter.content_part_added(idx, 0, &item_id).await?;
                }
                if !text.is_empty() {
                    let idx = state.message_idx.unwrap();
                    if let Item::Message { content, .. } = &mut new_output[idx] {
                        if let ContentPart::OutputText { text: t } = &mut content[0] {
                            t.push_str(&text);
                        }
                    }
                    let item_id = new_output[idx].id().to_string();
                    emitter.output_text_delta(idx, 0, &item_id, &text).await?;
                }
            }
            ProviderEvent::TextDone { .. } => {}
            ProviderEvent::ReasoningDelta { text } => state.reasoning_text.push_str(&text),
            ProviderEvent::ReasoningDone { text } => state.reasoning_text = text,
            ProviderEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_fragment,
            } => {
                let out_idx = if let Some(&idx) = state.tool_idx.get(&index) {
                    idx
                } else {
                    let item = Item::FunctionCall {
                        id: generate_id("fc"),
                        status: ItemStatus::InProgress,
                        call_id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        arguments: String::new(),
                    };
                    let idx = new_output.len();
                    new_output.push(item);
                    state.tool_idx.insert(index, idx);
                    emitter.output_item_added(idx, &new_output[idx]).await?;
                    idx
                };
                if let Item::FunctionCall { arguments, call_id, name: n, .. } = &mut new_output[out_idx] {
                    arguments.push_str(&arguments_fragment);
                    if call_id.is_empty() {
                        if let Some(id) = &id {
                            *call_id = id.clone();
                        }
                    }
                    if n.is_empty() {
                        if let Some(name) = &name {
                            *n = name.clone();
                        }
                    }
                }
                let item_id = new_output[out_idx].id().to_string();
                emitter
                    .function_call_arguments_delta(out_idx, &item_id, &arguments_fragment)
                    .await?;
            }
            ProviderEvent::ToolCallDone {
                index,
                id,
                name,
                arguments,
            } => {
                if let Some(&out_idx) = state.tool_idx.get(&index) {
                    if let Item::FunctionCall {
                        call_id,
                        name: n,
                        arguments: a,
                        status,
                        ..
                    } = &mut new_output[out_idx]
                    {
                        if !id.is_empty() {
                            *call_id = id;
                        }
                        if !name.is_empty() {
                            *n = name;
                        }
                        *a = arguments.clone();
                        *status = ItemStatus::Completed;
                    }
                    let item_id = new_output[out_idx].id().to_string();
                    emitter
                        .function_call_arguments_done(out_idx, &item_id, &arguments)
                        .await?;
                    emitter.output_item_done(out_idx, &new_output[out_idx]).await?;

                    let (call_id, call_name) = match &new_output[out_idx] {
                        Item::FunctionCall { call_id, name, .. } => (call_id.clone(), name.clone()),
                        _ => unreachable!(),
                    };
                    let parsed = serde_json::from_str::<Value>(&arguments).unwrap_or(Value::Null);
                    let call_index = state.pending_calls.len();
                    state.pending_calls.push(PendingCall {
                        call_id,
                        name: call_name,
                        arguments: parsed,
                        call_index,
                    });
                }
            }
            ProviderEvent::Done { finish_reason, usage } => {
                if let Some(usage) = usage {
                    response.usage.add(&usage);
                }
                if let Some(reason) = finish_reason {
                    state.finish_reason = Some(reason);
                }
            }
            ProviderEvent::Error { error } => {
                state.stream_error = Some(error);
            }
        }
        Ok(())
    }

    /// Closes out whatever item is still open at the end of a round: the
    /// in-progress message (if any) and a deferred reasoning item, which
    /// is only surfaced once complete since there is no public reasoning
    /// delta event (`spec.md` §9 open question, see DESIGN.md).
    async fn finalize_round(
        &self,
        finish_reason: &str,
        new_output: &mut Vec<Item>,
        state: &mut RoundState,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), ApiError> {
        let (status, _warning) = finish_reason_to_status(finish_reason);

        if !state.reasoning_text.is_empty() {
            let item = Item::Reasoning {
                id: generate_id("rs"),
                status: ItemStatus::Completed,
                text: std::mem::take(&mut state.reasoning_text),
            };
            let idx = new_output.len();
            new_output.push(item);
            emitter.output_item_added(idx, &new_output[idx]).await?;
            emitter.output_item_done(idx, &new_output[idx]).await?;
        }

        if let Some(idx) = state.message_idx {
            let text = match &new_output[idx] {
                Item::Message { content, .. } => content.first().and_then(ContentPart::text).unwrap_or("").to_string(),
                _ => String::new(),
            };
            let item_id = new_output[idx].id().to_string();
            emitter.output_text_done(idx, 0, &item_id, &text).await?;
            emitter.content_part_done(idx, 0, &item_id, &text).await?;
            if let Item::Message { status: s, .. } = &mut new_output[idx] {
                *s = status;
            }
            emitter.output_item_done(idx, &new_output[idx]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Map;

    use antwort_protocol::request::SamplingParams;
    use antwort_protocol::{PublicEventKind, ResponseInput, ResponseStatus, ToolChoice, Usage};
    use antwort_tools::{ToolExecutor, ToolResult};
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::{Capabilities, ModelInfo};
    use crate::store::{InMemoryResponseStore, ResponseStore};

    struct ScriptedRound {
        events: Vec<ProviderEvent>,
        cancel_before: bool,
    }

    impl ScriptedRound {
        fn of(events: Vec<ProviderEvent>) -> Self {
            Self { events, cancel_before: false }
        }
    }

    struct FakeBackend {
        rounds: Mutex<VecDeque<ScriptedRound>>,
    }

    impl FakeBackend {
        fn new(rounds: Vec<ScriptedRound>) -> Self {
            Self { rounds: Mutex::new(rounds.into()) }
        }
    }

    #[async_trait]
    impl BackendAdapter for FakeBackend {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                streaming: true,
                tool_calling: true,
                vision: false,
                audio: false,
                reasoning: true,
                max_context_window: 8192,
            }
        }

        async fn complete(&self, _req: &crate::backend::BackendRequest) -> Result<(Vec<Item>, Usage), ApiError> {
            unimplemented!("engine tests only drive the streaming path")
        }

        async fn stream(
            &self,
            _req: &crate::backend::BackendRequest,
            cancel: crate::cancel::CancelToken,
        ) -> Result<mpsc::UnboundedReceiver<ProviderEvent>, ApiError> {
            let round = self
                .rounds
                .lock()
                .pop_front()
                .expect("engine requested more backend rounds than scripted");
            if round.cancel_before {
                cancel.cancel();
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for event in round.events {
                let _ = tx.send(event);
            }
            Ok(rx)
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
            Ok(Vec::new())
        }
    }

    struct DelayedEcho {
        name: &'static str,
        delay_ms: u64,
        output: &'static str,
    }

    #[async_trait]
    impl ToolExecutor for DelayedEcho {
        fn kind(&self) -> &'static str {
            "echo"
        }

        fn can_execute(&self, tool_name: &str) -> bool {
            tool_name == self.name
        }

        async fn execute(&self, call: &antwort_tools::PendingCall) -> ToolResult {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            ToolResult::ok(call, self.output)
        }
    }

    #[derive(Default)]
    struct RecordingSink(Vec<PublicEvent>);

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&mut self, event: PublicEvent) -> Result<(), ApiError> {
            self.0.push(event);
            Ok(())
        }
    }

    fn request(stream: bool) -> ResponsesRequest {
        ResponsesRequest {
            model: "m".to_string(),
            input: ResponseInput::Text("hi".to_string()),
            instructions: None,
            tools: None,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            max_tool_calls: None,
            stream,
            previous_response_id: None,
            allowed_tools: None,
            sampling: SamplingParams::default(),
            metadata: Map::new(),
            user: None,
            reasoning: None,
            text: None,
        }
    }

    fn engine(backend: FakeBackend, tools: ToolExecutorRegistry, max_rounds: u32) -> Engine {
        Engine::new(
            Arc::new(backend),
            Arc::new(tools),
            InMemoryResponseStore::new(),
            InFlightRegistry::new(),
            ModelRemap::new(),
            max_rounds,
        )
    }

    #[tokio::test]
    async fn simple_completion_emits_the_documented_event_sequence() {
        let backend = FakeBackend::new(vec![ScriptedRound::of(vec![
            ProviderEvent::TextDelta { text: String::new() },
            ProviderEvent::TextDelta { text: "Hello".to_string() },
            ProviderEvent::TextDelta { text: " world".to_string() },
            ProviderEvent::Done { finish_reason: Some("stop".to_string()), usage: None },
        ])]);
        let engine = engine(backend, ToolExecutorRegistry::new(), 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        let text = match &response.output[0] {
            Item::Message { content, .. } => content[0].text().unwrap().to_string(),
            other => panic!("expected a message item, got {other:?}"),
        };
        assert_eq!(text, "Hello world");

        let kinds: Vec<&'static str> = sink.0.iter().map(|e| e.kind.wire_name()).collect();
        assert_eq!(
            kinds,
            vec![
                "response.created",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        let seqs: Vec<u64> = sink.0.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn tool_round_then_final_answer() {
        let round1 = ScriptedRound::of(vec![
            ProviderEvent::ToolCallDelta {
                index: 0,
                id: Some("c1".to_string()),
                name: Some("get_weather".to_string()),
                arguments_fragment: "{\"ci".to_string(),
            },
            ProviderEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments_fragment: "ty\":\"SF\"}".to_string(),
            },
            ProviderEvent::ToolCallDone {
                index: 0,
                id: "c1".to_string(),
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"SF\"}".to_string(),
            },
            ProviderEvent::Done { finish_reason: Some("tool_calls".to_string()), usage: None },
        ]);
        let round2 = ScriptedRound::of(vec![
            ProviderEvent::TextDelta { text: "It is sunny.".to_string() },
            ProviderEvent::Done { finish_reason: Some("stop".to_string()), usage: None },
        ]);
        let backend = FakeBackend::new(vec![round1, round2]);

        let mut tools = ToolExecutorRegistry::new();
        tools.register(Arc::new(DelayedEcho { name: "get_weather", delay_ms: 0, output: "sunny" }));
        let engine = engine(backend, tools, 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 3);
        match &response.output[0] {
            Item::FunctionCall { name, arguments, status, .. } => {
                assert_eq!(name, "get_weather");
                assert_eq!(arguments, "{\"city\":\"SF\"}");
                assert_eq!(*status, ItemStatus::Completed);
            }
            other => panic!("expected function_call, got {other:?}"),
        }
        match &response.output[1] {
            Item::FunctionCallOutput { call_id, output, is_error, .. } => {
                assert_eq!(call_id, "c1");
                assert_eq!(output, "sunny");
                assert!(!is_error);
            }
            other => panic!("expected function_call_output, got {other:?}"),
        }
        match &response.output[2] {
            Item::Message { content, .. } => {
                assert_eq!(content[0].text().unwrap(), "It is sunny.");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_tools_preserve_call_index_order_despite_completion_order() {
        let round1 = ScriptedRound::of(vec![
            ProviderEvent::ToolCallDelta {
                index: 0,
                id: Some("c0".to_string()),
                name: Some("slow".to_string()),
                arguments_fragment: "{}".to_string(),
            },
            ProviderEvent::ToolCallDelta {
                index: 1,
                id: Some("c1".to_string()),
                name: Some("fast".to_string()),
                arguments_fragment: "{}".to_string(),
            },
            ProviderEvent::ToolCallDone {
                index: 0,
                id: "c0".to_string(),
                name: "slow".to_string(),
                arguments: "{}".to_string(),
            },
            ProviderEvent::ToolCallDone {
                index: 1,
                id: "c1".to_string(),
                name: "fast".to_string(),
                arguments: "{}".to_string(),
            },
            ProviderEvent::Done { finish_reason: Some("tool_calls".to_string()), usage: None },
        ]);
        let round2 = ScriptedRound::of(vec![ProviderEvent::Done {
            finish_reason: Some("stop".to_string()),
            usage: None,
        }]);
        let backend = FakeBackend::new(vec![round1, round2]);

        let mut tools = ToolExecutorRegistry::new();
        tools.register(Arc::new(DelayedEcho { name: "slow", delay_ms: 30, output: "slow-out" }));
        tools.register(Arc::new(DelayedEcho { name: "fast", delay_ms: 0, output: "fast-out" }));
        let engine = engine(backend, tools, 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        let outputs: Vec<&str> = response
            .output
            .iter()
            .filter_map(|i| match i {
                Item::FunctionCallOutput { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["slow-out", "fast-out"]);
    }

    #[tokio::test]
    async fn unclaimed_tool_call_requires_action_with_no_second_round() {
        let round1 = ScriptedRound::of(vec![
            ProviderEvent::ToolCallDelta {
                index: 0,
                id: Some("c1".to_string()),
                name: Some("mystery".to_string()),
                arguments_fragment: "{}".to_string(),
            },
            ProviderEvent::ToolCallDone {
                index: 0,
                id: "c1".to_string(),
                name: "mystery".to_string(),
                arguments: "{}".to_string(),
            },
            ProviderEvent::Done { finish_reason: Some("tool_calls".to_string()), usage: None },
        ]);
        let backend = FakeBackend::new(vec![round1]);
        let engine = engine(backend, ToolExecutorRegistry::new(), 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::RequiresAction);
        assert_eq!(response.output.len(), 1);
        assert!(matches!(response.output[0], Item::FunctionCall { .. }));
        assert!(matches!(
            sink.0.last().unwrap().kind,
            PublicEventKind::ResponseRequiresAction { .. }
        ));
    }

    #[tokio::test]
    async fn mid_stream_backend_error_after_text_seals_failed_and_keeps_partial_output() {
        let round1 = ScriptedRound::of(vec![
            ProviderEvent::TextDelta { text: "partial".to_string() },
            ProviderEvent::Error {
                error: ResponseError {
                    error_type: "server_error".to_string(),
                    message: "upstream exploded".to_string(),
                    param: None,
                },
            },
        ]);
        let backend = FakeBackend::new(vec![round1]);
        let engine = engine(backend, ToolExecutorRegistry::new(), 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.error.as_ref().unwrap().error_type, "server_error");
        let text = match &response.output[0] {
            Item::Message { content, .. } => content[0].text().unwrap().to_string(),
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn cancellation_mid_stream_seals_cancelled() {
        let mut round = ScriptedRound::of(vec![ProviderEvent::TextDelta { text: "hi".to_string() }]);
        round.cancel_before = true;
        let backend = FakeBackend::new(vec![round]);
        let engine = engine(backend, ToolExecutorRegistry::new(), 16);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Cancelled);
        assert!(matches!(
            sink.0.last().unwrap().kind,
            PublicEventKind::ResponseCancelled { .. }
        ));
    }

    #[tokio::test]
    async fn max_rounds_exceeded_seals_incomplete() {
        let round = || {
            ScriptedRound::of(vec![
                ProviderEvent::ToolCallDelta {
                    index: 0,
                    id: Some("c1".to_string()),
                    name: Some("loopy".to_string()),
                    arguments_fragment: "{}".to_string(),
                },
                ProviderEvent::ToolCallDone {
                    index: 0,
                    id: "c1".to_string(),
                    name: "loopy".to_string(),
                    arguments: "{}".to_string(),
                },
                ProviderEvent::Done { finish_reason: Some("tool_calls".to_string()), usage: None },
            ])
        };
        let backend = FakeBackend::new(vec![round(), round()]);
        let mut tools = ToolExecutorRegistry::new();
        tools.register(Arc::new(DelayedEcho { name: "loopy", delay_ms: 0, output: "again" }));
        let engine = engine(backend, tools, 2);
        let mut sink = RecordingSink::default();

        let response = engine.create_response(request(true), &mut sink).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(response.incomplete_details.unwrap().reason, "max_rounds_exceeded");
    }

    #[tokio::test]
    async fn cancellation_before_response_created_yields_no_events_and_no_persisted_response() {
        let backend = FakeBackend::new(vec![]);
        let store = InMemoryResponseStore::new();
        let in_flight = InFlightRegistry::new();
        let engine = Engine::new(
            Arc::new(backend),
            Arc::new(ToolExecutorRegistry::new()),
            store.clone(),
            in_flight,
            ModelRemap::new(),
            16,
        );

        struct RefusingSink;
        #[async_trait]
        impl EventSink for RefusingSink {
            async fn send(&mut self, _event: PublicEvent) -> Result<(), ApiError> {
                Err(ApiError::cancelled())
            }
        }
        let mut sink = RefusingSink;

        let result = engine.create_response(request(true), &mut sink).await;
        assert!(result.is_err());
        assert!(store.list().await.is_empty());
    }
}
