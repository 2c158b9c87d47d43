//! The polymorphic tool executor seam (`spec.md` §4.3, §9 "Dynamic
//! dispatch over tool executors"): a registry of handlers keyed by a
//! `can_execute` predicate, equivalent to a sum type of executor kinds
//! {FunctionPlaceholder, Mcp, Sandbox, ...} dispatched in registration
//! order.

use async_trait::async_trait;
use serde_json::Value;

/// A single outstanding `function_call` item, as seen by the registry.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    /// The call's position in the assistant message that produced it —
    /// the ordering key outputs must be restored to regardless of
    /// completion order (`spec.md` §4.3 ordering invariant, §5).
    pub call_index: usize,
}

/// The paired result of executing a `PendingCall`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
    pub call_index: usize,
}

impl ToolResult {
    pub fn ok(call: &PendingCall, output: impl Into<String>) -> Self {
        ToolResult {
            call_id: call.call_id.clone(),
            output: output.into(),
            is_error: false,
            call_index: call.call_index,
        }
    }

    pub fn error(call: &PendingCall, message: impl Into<String>) -> Self {
        ToolResult {
            call_id: call.call_id.clone(),
            output: message.into(),
            is_error: true,
            call_index: call.call_index,
        }
    }
}

/// An executor that claims and runs some subset of tool calls by name.
/// Implementations cover MCP servers reached over HTTP, the sandbox
/// execution service, or any other equivalent executor; the engine never
/// distinguishes them beyond this trait.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// A short tag identifying the executor's kind, used only for
    /// diagnostics (`mcp`, `sandbox`, ...).
    fn kind(&self) -> &'static str;

    /// Whether this executor claims calls to `tool_name`. The registry
    /// asks executors in registration order and dispatches to the first
    /// one that answers `true`.
    fn can_execute(&self, tool_name: &str) -> bool;

    /// Run one tool call. Implementations should not panic; any internal
    /// failure must be reported as `ToolResult { is_error: true, .. }` so
    /// the agentic loop can continue (`spec.md` §4.3 point 3, §7).
    async fn execute(&self, call: &PendingCall) -> ToolResult;
}
