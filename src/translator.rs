//! Stream Translator (`spec.md` §4.1): consumes a backend chat-chunk SSE
//! stream and emits normalized `ProviderEvent`s, assembling tool-call
//! arguments across chunks. The translator owns no task of its own; it
//! runs on a caller-supplied worker and honors cancellation via a token
//! checked between lines.

use std::collections::BTreeMap;

use futures::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use antwort_protocol::chunk::{finish_reason_to_status, ChatChunk, ChunkChoice};
use antwort_protocol::{ProviderEvent, ResponseError};

use crate::cancel::CancelToken;

#[derive(Debug, Default, Clone)]
struct ToolCallBuffer {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Strips the SSE `data:` prefix. Non-data lines (blank lines, `event:`
/// framing, `:` comments) are not payloads.
pub fn extract_data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:").map(|rest| rest.trim_start())
}

/// Pure, synchronous chunk-mapping state machine (`spec.md` §4.1
/// "Chunk mapping rules"), kept separate from the async line-reading loop
/// so the mapping rules are directly unit-testable.
#[derive(Default)]
pub struct StreamTranslator {
    buffers: BTreeMap<usize, ToolCallBuffer>,
    text_buffer: String,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one SSE payload line (already stripped of the `data:`
    /// prefix). Returns `None` on the `[DONE]` sentinel; `Some(events)`
    /// otherwise, where `events` may be empty (malformed line, or a
    /// chunk that is a pure no-op).
    pub fn process_line(&mut self, payload: &str) -> Option<Vec<ProviderEvent>> {
        if payload.trim() == "[DONE]" {
            return None;
        }
        match serde_json::from_str::<ChatChunk>(payload) {
            Ok(chunk) => Some(self.process_chunk(chunk)),
            Err(e) => {
                warn!(error = %e, payload, "malformed backend SSE chunk, skipping");
                Some(Vec::new())
            }
        }
    }

    pub fn process_chunk(&mut self, chunk: ChatChunk) -> Vec<ProviderEvent> {
        if chunk.choices.is_empty() {
            return match chunk.usage {
                Some(usage) => vec![ProviderEvent::Done {
                    finish_reason: None,
                    usage: Some(usage),
                }],
                None => Vec::new(),
            };
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            events.extend(self.process_choice(choice));
        }
        events
    }

    fn process_choice(&mut self, choice: ChunkChoice) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(finish_reason) = choice.finish_reason {
            if !self.buffers.is_empty() || finish_reason == "tool_calls" {
                for (index, buf) in std::mem::take(&mut self.buffers) {
                    events.push(ProviderEvent::ToolCallDone {
                        index,
                        id: buf.id.unwrap_or_default(),
                        name: buf.name.unwrap_or_default(),
                        arguments: buf.arguments,
                    });
                }
            }
            events.push(ProviderEvent::TextDone {
                text: std::mem::take(&mut self.text_buffer),
            });
            let (_status, warning) = finish_reason_to_status(&finish_reason);
            if let Some(warning) = warning {
                warn!(finish_reason, warning, "unrecognized finish_reason, treating as completed");
            }
            events.push(ProviderEvent::Done {
                finish_reason: Some(finish_reason),
                usage: None,
            });
            return events;
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let index = tc.index;
                let fragment = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.clone())
                    .unwrap_or_default();

                if let Some(buf) = self.buffers.get_mut(&index) {
                    buf.arguments.push_str(&fragment);
                    events.push(ProviderEvent::ToolCallDelta {
                        index,
                        id: buf.id.clone(),
                        name: None,
                        arguments_fragment: fragment,
                    });
                } else {
                    let name = tc.function.as_ref().and_then(|f| f.name.clone());
                    let mut buf = ToolCallBuffer {
                        id: tc.id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    };
                    buf.arguments.push_str(&fragment);
                    events.push(ProviderEvent::ToolCallDelta {
                        index,
                        id: buf.id.clone(),
                        name,
                        arguments_fragment: fragment,
                    });
                    self.buffers.insert(index, buf);
                }
            }
            return events;
        }

        if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
            if !reasoning.is_empty() {
                events.push(ProviderEvent::ReasoningDelta {
                    text: reasoning.to_string(),
                });
            }
        }

        if let Some(text) = choice.delta.content.as_deref() {
            if !text.is_empty() {
                self.text_buffer.push_str(text);
                events.push(ProviderEvent::TextDelta {
                    text: text.to_string(),
                });
                return events;
            }
        }

        if choice.delta.role.is_some() {
            events.push(ProviderEvent::TextDelta {
                text: String::new(),
            });
        }

        events
    }

    /// Runs the translator over an SSE line stream, forwarding emitted
    /// events on `tx` until the stream ends, `[DONE]` is seen, or `cancel`
    /// is observed between lines.
    pub async fn run<S>(mut self, mut lines: S, cancel: CancelToken, tx: mpsc::UnboundedSender<ProviderEvent>)
    where
        S: Stream<Item = std::io::Result<String>> + Unpin,
    {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let line = match lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    if !cancel.is_cancelled() {
                        let _ = tx.send(ProviderEvent::Error {
                            error: ResponseError {
                                error_type: "server_error".to_string(),
                                message: e.to_string(),
                                param: None,
                            },
                        });
                    }
                    return;
                }
                None => return,
            };

            let Some(payload) = extract_data_payload(&line) else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }

            match self.process_line(payload) {
                None => return,
                Some(events) => {
                    for event in events {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_delta_chunk(text: &str) -> String {
        format!(
            r#"{{"id":"c1","model":"m","choices":[{{"index":0,"delta":{{"content":"{text}"}},"finish_reason":null}}]}}"#
        )
    }

    #[test]
    fn extract_data_payload_strips_prefix_and_crlf() {
        assert_eq!(extract_data_payload("data: {\"a\":1}\r\n"), Some("{\"a\":1}"));
        assert_eq!(extract_data_payload("event: ping\r\n"), None);
        assert_eq!(extract_data_payload(""), None);
    }

    #[test]
    fn text_delta_then_done_accumulates_and_closes() {
        let mut t = StreamTranslator::new();
        let events = t.process_line(&text_delta_chunk("hel")).unwrap();
        assert!(matches!(&events[0], ProviderEvent::TextDelta { text } if text == "hel"));

        let events = t.process_line(&text_delta_chunk("lo")).unwrap();
        assert!(matches!(&events[0], ProviderEvent::TextDelta { text } if text == "lo"));

        let done = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let events = t.process_line(done).unwrap();
        assert!(matches!(&events[0], ProviderEvent::TextDone { text } if text == "hello"));
        assert!(matches!(&events[1], ProviderEvent::Done { finish_reason: Some(r), .. } if r == "stop"));
    }

    #[test]
    fn done_sentinel_ends_stream() {
        let mut t = StreamTranslator::new();
        assert!(t.process_line("[DONE]").is_none());
        assert!(t.process_line(" [DONE] ").is_none());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let mut t = StreamTranslator::new();
        let events = t.process_line("{not json").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn role_only_chunk_emits_zero_length_marker() {
        let mut t = StreamTranslator::new();
        let chunk = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        let events = t.process_line(chunk).unwrap();
        assert!(matches!(&events[0], ProviderEvent::TextDelta { text } if text.is_empty()));
    }

    #[test]
    fn usage_only_chunk_with_no_choices_is_a_pure_done() {
        let mut t = StreamTranslator::new();
        let chunk = r#"{"id":"c1","model":"m","choices":[],"usage":{"input_tokens":3,"output_tokens":4,"total_tokens":7}}"#;
        let events = t.process_line(chunk).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ProviderEvent::Done { finish_reason: None, usage: Some(u) } if u.total_tokens == 7
        ));
    }

    #[test]
    fn tool_call_arguments_assemble_across_fragmented_chunks() {
        let mut t = StreamTranslator::new();
        let first = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":"{\"q\":"}}]},"finish_reason":null}]}"#;
        let second = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]},"finish_reason":null}]}"#;
        let done = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#;

        let events = t.process_line(first).unwrap();
        match &events[0] {
            ProviderEvent::ToolCallDelta { index, id, name, arguments_fragment } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("lookup"));
                assert_eq!(arguments_fragment, "{\"q\":");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let events = t.process_line(second).unwrap();
        assert!(
            matches!(&events[0], ProviderEvent::ToolCallDelta { name: None, arguments_fragment, .. } if arguments_fragment == "\"rust\"}")
        );

        let events = t.process_line(done).unwrap();
        match &events[0] {
            ProviderEvent::ToolCallDone { index, id, name, arguments } => {
                assert_eq!(*index, 0);
                assert_eq!(id, "call_1");
                assert_eq!(name, "lookup");
                assert_eq!(arguments, "{\"q\":\"rust\"}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn multiple_tool_calls_flush_in_their_own_index_not_zero() {
        let mut t = StreamTranslator::new();
        let chunk = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":2,"id":"call_9","type":"function","function":{"name":"f","arguments":"{}"}}]},"finish_reason":null}]}"#;
        t.process_line(chunk).unwrap();

        let done = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#;
        let events = t.process_line(done).unwrap();
        assert!(matches!(&events[0], ProviderEvent::ToolCallDone { index: 2, .. }));
    }

    #[test]
    fn reasoning_delta_does_not_suppress_text_handling() {
        let mut t = StreamTranslator::new();
        let chunk = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"reasoning_content":"thinking"},"finish_reason":null}]}"#;
        let events = t.process_line(chunk).unwrap();
        assert!(matches!(&events[0], ProviderEvent::ReasoningDelta { text } if text == "thinking"));
    }

    #[tokio::test]
    async fn run_closes_exactly_once_on_done_sentinel() {
        use futures::stream;

        let lines = stream::iter(vec![
            Ok(format!("data: {}", text_delta_chunk("hi"))),
            Ok("data: [DONE]".to_string()),
            Ok("data: {\"id\":\"late\",\"model\":\"m\",\"choices\":[]}".to_string()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        StreamTranslator::new().run(lines, CancelToken::new(), tx).await;

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 1, "only the pre-[DONE] event should be forwarded");
    }

    #[tokio::test]
    async fn run_stops_immediately_once_cancelled() {
        use futures::stream;

        let cancel = CancelToken::new();
        cancel.cancel();
        let lines = stream::iter(vec![Ok(format!("data: {}", text_delta_chunk("hi")))]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        StreamTranslator::new().run(lines, cancel, tx).await;

        assert!(rx.recv().await.is_none());
    }
}
