//! An executor that claims tool calls on behalf of a remote MCP server
//! reached over HTTP. The engine treats the server as an opaque executor
//! (`spec.md` Glossary "MCP"); everything about the wire protocol it
//! speaks to the remote tool server lives behind this one trait impl.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::executor::{PendingCall, ToolExecutor, ToolResult};

#[derive(Debug, Serialize)]
struct McpCallRequest<'a> {
    tool_name: &'a str,
    call_id: &'a str,
    arguments: &'a Value,
}

#[derive(Debug, Deserialize)]
struct McpCallResponse {
    output: Value,
    #[serde(default)]
    is_error: bool,
}

/// Claims calls for a fixed set of tool names advertised by one MCP
/// server and dispatches them over a plain HTTP POST.
pub struct McpExecutor {
    server_label: String,
    endpoint: String,
    tool_names: HashSet<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl McpExecutor {
    pub fn new(
        server_label: impl Into<String>,
        endpoint: impl Into<String>,
        tool_names: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            server_label: server_label.into(),
            endpoint: endpoint.into(),
            tool_names: tool_names.into_iter().collect(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn server_label(&self) -> &str {
        &self.server_label
    }
}

#[async_trait]
impl ToolExecutor for McpExecutor {
    fn kind(&self) -> &'static str {
        "mcp"
    }

    fn can_execute(&self, tool_name: &str) -> bool {
        self.tool_names.contains(tool_name)
    }

    async fn execute(&self, call: &PendingCall) -> ToolResult {
        let started = Instant::now();
        let body = McpCallRequest {
            tool_name: &call.name,
            call_id: &call.call_id,
            arguments: &call.arguments,
        };

        let sent = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        let result = match sent {
            Ok(resp) if resp.status().is_success() => match resp.json::<McpCallResponse>().await {
                Ok(parsed) => ToolResult {
                    call_id: call.call_id.clone(),
                    output: parsed.output.to_string(),
                    is_error: parsed.is_error,
                    call_index: call.call_index,
                },
                Err(e) => ToolResult::error(call, format!("malformed MCP response: {e}")),
            },
            Ok(resp) => ToolResult::error(call, format!("MCP server returned {}", resp.status())),
            Err(e) => ToolResult::error(call, format!("MCP server unreachable: {e}")),
        };

        if result.is_error {
            warn!(
                server = %self.server_label,
                tool = %call.name,
                elapsed_ms = started.elapsed().as_millis(),
                "mcp tool call failed"
            );
        }
        result
    }
}
