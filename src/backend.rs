//! Backend Adapter (`spec.md` §4.2): converts a normalized request into a
//! chat-completion call against an upstream inference backend, buffered
//! or streaming, and maps finish reasons back to `Item.status`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::error;

use antwort_protocol::chunk::finish_reason_to_status;
use antwort_protocol::item::generate_id;
use antwort_protocol::{ApiError, ErrorKind, Item, ItemStatus, ProviderEvent, ResponsesRequest, Usage};

use crate::cancel::CancelToken;
use crate::error::kind_for_transport_error;
use crate::translator::StreamTranslator;

/// Capabilities a backend advertises. The engine refuses requests that
/// demand unsupported capabilities before any backend call
/// (`spec.md` §4.2 "Capabilities").
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub streaming: bool,
    pub tool_calling: bool,
    pub vision: bool,
    pub audio: bool,
    pub reasoning: bool,
    pub max_context_window: u32,
}

/// A fully-built chat-completion call, ready to be sent.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
    pub parallel_tool_calls: bool,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub top_logprobs: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// Optional static model-name remap, e.g. public alias → upstream id.
pub type ModelRemap = HashMap<String, String>;

/// Converts a completed conversation (the original request plus any
/// tool-round history appended so far) into an ordered chat messages
/// array: system → user/assistant/tool rounds.
pub fn build_backend_request(
    req: &ResponsesRequest,
    history: &[Item],
    remap: &ModelRemap,
) -> BackendRequest {
    let mut messages = Vec::new();

    if let Some(instructions) = &req.instructions {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    match &req.input {
        antwort_protocol::ResponseInput::Text(text) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        antwort_protocol::ResponseInput::Items(items) => {
            messages.extend(items_to_messages(items));
        }
    }

    messages.extend(items_to_messages(history));

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter_map(|t| match t {
                antwort_protocol::ToolDef::Function(f) => Some(json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    }
                })),
                _ => None,
            })
            .collect::<Vec<_>>()
    });

    let model = remap.get(&req.model).cloned().unwrap_or_else(|| req.model.clone());
    let tool_choice = if matches!(req.tool_choice, antwort_protocol::ToolChoice::Auto) {
        None
    } else {
        serde_json::to_value(&req.tool_choice).ok()
    };

    BackendRequest {
        model,
        messages,
        tools,
        tool_choice,
        parallel_tool_calls: req.parallel_tool_calls,
        stream: req.stream,
        temperature: req.sampling.temperature,
        top_p: req.sampling.top_p,
        max_tokens: req.sampling.max_tokens,
        frequency_penalty: req.sampling.frequency_penalty,
        presence_penalty: req.sampling.presence_penalty,
        top_logprobs: req.sampling.top_logprobs,
        stop: req.sampling.stop.clone(),
    }
}

fn items_to_messages(items: &[Item]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Item::Message { role, content, .. } => {
                let text: String = content.iter().filter_map(|p| p.text()).collect();
                messages.push(json!({"role": role, "content": text}));
            }
            Item::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                messages.push(json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": {"name": name, "arguments": arguments}
                    }]
                }));
            }
            Item::FunctionCallOutput {
                call_id, output, ..
            } => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output,
                }));
            }
            Item::Reasoning { .. } => {}
        }
    }
    messages
}

impl BackendRequest {
    fn to_json(&self) -> Value {
        json!({
            "model": self.model,
            "messages": self.messages,
            "tools": self.tools,
            "tool_choice": self.tool_choice,
            "parallel_tool_calls": self.parallel_tool_calls,
            "stream": self.stream,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "max_tokens": self.max_tokens,
            "frequency_penalty": self.frequency_penalty,
            "presence_penalty": self.presence_penalty,
            "top_logprobs": self.top_logprobs,
            "stop": self.stop,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn complete(&self, req: &BackendRequest) -> Result<(Vec<Item>, Usage), ApiError>;

    async fn stream(
        &self,
        req: &BackendRequest,
        cancel: CancelToken,
    ) -> Result<mpsc::UnboundedReceiver<ProviderEvent>, ApiError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError>;
}

/// A backend speaking the OpenAI-compatible `/v1/chat/completions` wire
/// format over plain HTTP.
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    capabilities: Capabilities,
    timeout: Duration,
}

impl OpenAiCompatibleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, capabilities: Capabilities) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            capabilities,
            timeout: Duration::from_secs(120),
        }
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.post(&url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn map_transport_error(resp: reqwest::Response) -> ApiError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let kind = kind_for_transport_error(Some(status));
        let mut err = ApiError::new(kind, format!("upstream returned {status}: {body}"));
        if kind == ErrorKind::InvalidRequest {
            if let Ok(v) = serde_json::from_str::<Value>(&body) {
                if let Some(param) = v.pointer("/error/param").and_then(|p| p.as_str()) {
                    err = err.with_param(param);
                }
            }
        }
        err
    }
}

#[async_trait]
impl BackendAdapter for OpenAiCompatibleAdapter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn complete(&self, req: &BackendRequest) -> Result<(Vec<Item>, Usage), ApiError> {
        let mut body = req.to_json();
        body["stream"] = json!(false);

        let sent = self.request_builder("/chat/completions").json(&body).send().await;
        let resp = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ApiError::timeout(e.to_string())),
            Err(e) => return Err(ApiError::server_error(e.to_string())),
        };

        if !resp.status().is_success() {
            return Err(Self::map_transport_error(resp).await);
        }

        let parsed: antwort_protocol::ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::server_error(format!("malformed upstream response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::server_error("upstream returned no choices"))?;

        let mut items = Vec::new();
        if let Some(tool_calls) = choice.message.tool_calls {
            for tc in tool_calls {
                items.push(Item::FunctionCall {
                    id: generate_id("fc"),
                    status: ItemStatus::Completed,
                    call_id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                });
            }
        }
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            let status = choice
                .finish_reason
                .as_deref()
                .map(|r| finish_reason_to_status(r).0)
                .unwrap_or(ItemStatus::Completed);
            items.push(Item::Message {
                id: generate_id("msg"),
                status,
                role: "assistant".to_string(),
                content: vec![antwort_protocol::ContentPart::OutputText { text: content }],
            });
        }

        Ok((items, parsed.usage.unwrap_or_default()))
    }

    async fn stream(
        &self,
        req: &BackendRequest,
        cancel: CancelToken,
    ) -> Result<mpsc::UnboundedReceiver<ProviderEvent>, ApiError> {
        let mut body = req.to_json();
        body["stream"] = json!(true);

        let sent = self.request_builder("/chat/completions").json(&body).send().await;
        let resp = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ApiError::timeout(e.to_string())),
            Err(e) => return Err(ApiError::server_error(e.to_string())),
        };

        if !resp.status().is_success() {
            return Err(Self::map_transport_error(resp).await);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let byte_stream = resp.bytes_stream();
        let lines = sse_lines(byte_stream);

        // Spawned on a sibling worker; the translator owns no task of its
        // own (`spec.md` §4.1). The channel closes exactly once, when this
        // task drops `tx` on return (`spec.md` §4.2 "Closing is exactly-once").
        tokio::spawn(async move {
            let translator = StreamTranslator::new();
            translator.run(lines, cancel, tx).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::server_error(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::map_transport_error(resp).await);
        }
        #[derive(serde::Deserialize)]
        struct ModelsList {
            data: Vec<ModelInfo>,
        }
        let parsed: ModelsList = resp
            .json()
            .await
            .map_err(|e| ApiError::server_error(format!("malformed /models response: {e}")))?;
        Ok(parsed.data)
    }
}

/// Adapts a byte stream into SSE text lines for the translator.
fn sse_lines(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin + Send + 'static,
) -> impl futures::Stream<Item = std::io::Result<String>> + Unpin + Send + 'static {
    let mut buf = String::new();
    let mut byte_stream = Box::pin(byte_stream);
    Box::pin(futures::stream::poll_fn(move |cx| loop {
        if let Some(pos) = buf.find('\n') {
            let line = buf[..pos].to_string();
            buf.drain(..=pos);
            return std::task::Poll::Ready(Some(Ok(line)));
        }
        match byte_stream.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(chunk))) => {
                buf.push_str(&String::from_utf8_lossy(&chunk));
            }
            std::task::Poll::Ready(Some(Err(e))) => {
                error!(error = %e, "backend stream read error");
                return std::task::Poll::Ready(Some(Err(std::io::Error::other(e))));
            }
            std::task::Poll::Ready(None) => {
                if buf.is_empty() {
                    return std::task::Poll::Ready(None);
                }
                return std::task::Poll::Ready(Some(Ok(std::mem::take(&mut buf))));
            }
            std::task::Poll::Pending => return std::task::Poll::Pending,
        }
    }))
}
