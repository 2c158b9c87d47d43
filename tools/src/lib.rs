//! Tool Executor Registry (`spec.md` §4.3): dispatches a tool call to the
//! executor that claims it, filters against an allow-list, and enforces
//! parallel vs sequential execution policy.

pub mod error;
pub mod executor;
pub mod mcp;
pub mod registry;

pub use error::ToolError;
pub use executor::{PendingCall, ToolExecutor, ToolResult};
pub use mcp::McpExecutor;
pub use registry::{tool_allowed, RoundOutcome, ToolExecutorRegistry};
