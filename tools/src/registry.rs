//! The Tool Executor Registry (`spec.md` §4.3).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::warn;

use crate::executor::{PendingCall, ToolExecutor, ToolResult};

/// Absent `allowed_tools` allows every tool; an *empty* list also allows
/// every tool, matching the sampled source's behavior
/// (`spec.md` §9 open question — decided explicitly, see DESIGN.md).
pub fn tool_allowed(allowed_tools: Option<&[String]>, name: &str) -> bool {
    match allowed_tools {
        None => true,
        Some([]) => true,
        Some(list) => list.iter().any(|n| n == name),
    }
}

/// The outcome of one tool round: outputs in call-index order, plus any
/// calls no registered executor claimed (these become `requires_action`).
#[derive(Debug, Default)]
pub struct RoundOutcome {
    pub outputs: Vec<ToolResult>,
    pub unclaimed: Vec<PendingCall>,
}

/// An ordered list of executors, dispatched in registration order.
#[derive(Default, Clone)]
pub struct ToolExecutorRegistry {
    executors: Vec<Arc<dyn ToolExecutor>>,
}

impl ToolExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.executors.push(executor);
    }

    fn find_executor(&self, tool_name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors
            .iter()
            .find(|e| e.can_execute(tool_name))
            .cloned()
    }

    /// Filter, claim, and dispatch one round of tool calls.
    pub async fn run_round(
        &self,
        calls: Vec<PendingCall>,
        allowed_tools: Option<&[String]>,
        parallel: bool,
    ) -> RoundOutcome {
        let mut outputs = Vec::with_capacity(calls.len());
        let mut unclaimed = Vec::new();
        let mut claimed: Vec<(Arc<dyn ToolExecutor>, PendingCall)> = Vec::new();

        // 1. Filter + 2. Claim
        for call in calls {
            if !tool_allowed(allowed_tools, &call.name) {
                outputs.push(ToolResult::error(
                    &call,
                    format!("tool '{}' is not in the request's allowed_tools", call.name),
                ));
                continue;
            }
            match self.find_executor(&call.name) {
                Some(executor) => claimed.push((executor, call)),
                None => unclaimed.push(call),
            }
        }

        // 3. Dispatch
        let dispatched = if parallel {
            join_all(
                claimed
                    .into_iter()
                    .map(|(executor, call)| Self::execute_guarded(executor, call)),
            )
            .await
        } else {
            let mut results = Vec::new();
            for (executor, call) in claimed {
                results.push(Self::execute_guarded(executor, call).await);
            }
            results
        };
        outputs.extend(dispatched);

        // Restore call-index order regardless of completion order
        // (`spec.md` §4.3 ordering invariant, §5 ordering guarantee (c)).
        outputs.sort_by_key(|r| r.call_index);
        unclaimed.sort_by_key(|c| c.call_index);

        RoundOutcome { outputs, unclaimed }
    }

    /// Runs one executor invocation, converting a panic or unchecked error
    /// into `is_error = true` so the loop proceeds (`spec.md` §4.3 point 3).
    async fn execute_guarded(executor: Arc<dyn ToolExecutor>, call: PendingCall) -> ToolResult {
        let name = call.name.clone();
        match AssertUnwindSafe(executor.execute(&call)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %name, "tool executor panicked");
                ToolResult::error(&call, format!("tool '{name}' executor panicked"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn call(name: &str, index: usize) -> PendingCall {
        PendingCall {
            call_id: format!("call_{index}"),
            name: name.to_string(),
            arguments: json!({}),
            call_index: index,
        }
    }

    struct Echo {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl ToolExecutor for Echo {
        fn kind(&self) -> &'static str {
            "echo"
        }

        fn can_execute(&self, tool_name: &str) -> bool {
            tool_name == self.name
        }

        async fn execute(&self, call: &PendingCall) -> ToolResult {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            ToolResult::ok(call, format!("{}-done", self.name))
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolExecutor for Panics {
        fn kind(&self) -> &'static str {
            "panics"
        }

        fn can_execute(&self, tool_name: &str) -> bool {
            tool_name == "boom"
        }

        async fn execute(&self, _call: &PendingCall) -> ToolResult {
            panic!("executor exploded");
        }
    }

    #[test]
    fn tool_allowed_absent_or_empty_allows_everything() {
        assert!(tool_allowed(None, "anything"));
        assert!(tool_allowed(Some(&[]), "anything"));
        assert!(tool_allowed(Some(&["a".to_string()]), "a"));
        assert!(!tool_allowed(Some(&["a".to_string()]), "b"));
    }

    #[tokio::test]
    async fn outputs_restore_call_order_regardless_of_completion_order() {
        let mut registry = ToolExecutorRegistry::new();
        registry.register(Arc::new(Echo { name: "slow", delay_ms: 30 }));
        registry.register(Arc::new(Echo { name: "fast", delay_ms: 0 }));

        let calls = vec![call("slow", 0), call("fast", 1)];
        let outcome = registry.run_round(calls, None, true).await;

        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.outputs[0].call_index, 0);
        assert_eq!(outcome.outputs[1].call_index, 1);
        assert_eq!(outcome.outputs[0].output, "slow-done");
    }

    #[tokio::test]
    async fn disallowed_tool_is_rejected_without_dispatch() {
        let mut registry = ToolExecutorRegistry::new();
        registry.register(Arc::new(Echo { name: "fast", delay_ms: 0 }));

        let calls = vec![call("fast", 0)];
        let allowed = vec!["other".to_string()];
        let outcome = registry.run_round(calls, Some(&allowed), true).await;

        assert_eq!(outcome.outputs.len(), 1);
        assert!(outcome.outputs[0].is_error);
        assert!(outcome.unclaimed.is_empty());
    }

    #[tokio::test]
    async fn unclaimed_calls_are_reported_separately() {
        let registry = ToolExecutorRegistry::new();
        let calls = vec![call("mystery", 0)];
        let outcome = registry.run_round(calls, None, true).await;

        assert!(outcome.outputs.is_empty());
        assert_eq!(outcome.unclaimed.len(), 1);
        assert_eq!(outcome.unclaimed[0].name, "mystery");
    }

    #[tokio::test]
    async fn panicking_executor_becomes_an_error_result() {
        let mut registry = ToolExecutorRegistry::new();
        registry.register(Arc::new(Panics));

        let calls = vec![call("boom", 0)];
        let outcome = registry.run_round(calls, None, true).await;

        assert_eq!(outcome.outputs.len(), 1);
        assert!(outcome.outputs[0].is_error);
    }

    #[tokio::test]
    async fn sequential_mode_still_preserves_call_order() {
        let mut registry = ToolExecutorRegistry::new();
        registry.register(Arc::new(Echo { name: "a", delay_ms: 0 }));
        registry.register(Arc::new(Echo { name: "b", delay_ms: 0 }));

        let calls = vec![call("b", 0), call("a", 1)];
        let outcome = registry.run_round(calls, None, false).await;

        assert_eq!(outcome.outputs[0].output, "b-done");
        assert_eq!(outcome.outputs[1].output, "a-done");
    }
}
