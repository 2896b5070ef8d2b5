//! Concurrent execution of one `ToolYielding` batch.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use agentrun_core::conversation::ToolCallStatus;
use agentrun_core::{ToolCallInfo, ToolRegistry};

/// Execute every call concurrently and return them finished, in input order.
///
/// Each call runs on its own task: an error or panic in one tool marks only
/// that record `Failed` (error text as the result).
#[instrument(skip_all, fields(count = calls.len()))]
pub async fn execute_tool_batch(
    tools: &Arc<ToolRegistry>,
    calls: Vec<ToolCallInfo>,
    cancel: &CancellationToken,
) -> Vec<ToolCallInfo> {
    let handles: Vec<_> = calls
        .into_iter()
        .map(|mut call| {
            let tools = Arc::clone(tools);
            let cancel = cancel.clone();
            call.status = ToolCallStatus::Executing;
            let fallback = call.clone();
            let handle = tokio::spawn(async move { execute_one(&tools, call, &cancel).await });
            (fallback, handle)
        })
        .collect();

    let joined = futures::future::join_all(
        handles
            .into_iter()
            .map(|(fallback, handle)| async move { (fallback, handle.await) }),
    )
    .await;

    joined
        .into_iter()
        .map(|(fallback, result)| match result {
            Ok(call) => call,
            Err(join_error) => {
                warn!(tool = %fallback.name, error = %join_error, "tool task aborted");
                counter!("agent_tool_executions_total", "status" => "failed").increment(1);
                let message = format!("Tool {} panicked", fallback.name);
                fallback.failed(message)
            }
        })
        .collect()
}

async fn execute_one(
    tools: &ToolRegistry,
    call: ToolCallInfo,
    cancel: &CancellationToken,
) -> ToolCallInfo {
    let start = Instant::now();
    let outcome = tools.execute(&call, cancel).await;
    histogram!("agent_tool_execution_duration_seconds").record(start.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            info!(tool = %call.name, id = %call.id, "tool executed");
            counter!("agent_tool_executions_total", "status" => "completed").increment(1);
            call.completed(result)
        }
        Err(error) => {
            warn!(tool = %call.name, id = %call.id, error = %error, "tool failed");
            counter!("agent_tool_executions_total", "status" => "failed").increment(1);
            call.failed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::{ClientTool, ToolContext, ToolDefinition, ToolError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Sleepy {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl ClientTool for Sleepy {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.into(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _call: &ToolCallInfo,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(format!("{} done", self.name))
        }
    }

    struct Broken;

    #[async_trait]
    impl ClientTool for Broken {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "broken".into(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _call: &ToolCallInfo,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            Err(ToolError::Execution {
                tool: "broken".into(),
                message: "disk full".into(),
            })
        }
    }

    struct Panicky;

    #[async_trait]
    impl ClientTool for Panicky {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "panicky".into(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _call: &ToolCallInfo,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            panic!("tool bug");
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::new("room")
                .with_tool(Arc::new(Sleepy {
                    name: "slow",
                    delay_ms: 50,
                }))
                .with_tool(Arc::new(Sleepy {
                    name: "fast",
                    delay_ms: 1,
                }))
                .with_tool(Arc::new(Broken))
                .with_tool(Arc::new(Panicky)),
        )
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let calls = vec![
            ToolCallInfo::pending("a", "slow"),
            ToolCallInfo::pending("b", "fast"),
        ];
        let out = execute_tool_batch(&registry(), calls, &CancellationToken::new()).await;
        assert_eq!(out[0].id, "a");
        assert_eq!(out[0].result.as_deref(), Some("slow done"));
        assert_eq!(out[1].id, "b");
        assert!(out.iter().all(|c| c.status == ToolCallStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_runs_concurrently() {
        let calls = vec![
            ToolCallInfo::pending("a", "slow"),
            ToolCallInfo::pending("b", "slow"),
            ToolCallInfo::pending("c", "slow"),
        ];
        let started = tokio::time::Instant::now();
        let out = execute_tool_batch(&registry(), calls, &CancellationToken::new()).await;

        // Three 50ms tools run back to back would take 150ms.
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(out.iter().all(|c| c.status == ToolCallStatus::Completed));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_tool() {
        let calls = vec![
            ToolCallInfo::pending("a", "broken"),
            ToolCallInfo::pending("b", "fast"),
            ToolCallInfo::pending("c", "missing"),
            ToolCallInfo::pending("d", "panicky"),
        ];
        let out = execute_tool_batch(&registry(), calls, &CancellationToken::new()).await;

        assert_eq!(out[0].status, ToolCallStatus::Failed);
        assert!(out[0].result.as_deref().unwrap().contains("disk full"));
        assert_eq!(out[1].status, ToolCallStatus::Completed);
        assert_eq!(out[2].status, ToolCallStatus::Failed);
        assert_eq!(out[2].result.as_deref(), Some("Tool not found: missing"));
        assert_eq!(out[3].status, ToolCallStatus::Failed);
        assert!(out[3].result.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn cancelled_batch_fails_every_call() {
        let token = CancellationToken::new();
        token.cancel();
        let out = execute_tool_batch(
            &registry(),
            vec![ToolCallInfo::pending("a", "fast")],
            &token,
        )
        .await;
        assert_eq!(out[0].status, ToolCallStatus::Failed);
        assert_eq!(out[0].result.as_deref(), Some("Operation cancelled"));
    }

    #[tokio::test]
    async fn empty_batch() {
        let out = execute_tool_batch(&registry(), Vec::new(), &CancellationToken::new()).await;
        assert!(out.is_empty());
    }
}
