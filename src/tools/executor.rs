//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。一条 Assistant 消息中的全部 tool call 并发执行（受工具信号量限制），
//! 结果按调用顺序包装为 ToolResult 消息。未知工具与参数错误转为文本结果；
//! Unavailable / 超时按 max_retries 重试，重试耗尽升级为 WorkflowError::ToolUnavailable。
//! 每次尝试输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::WorkflowError;
use crate::llm::ToolSpec;
use crate::memory::{Message, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

/// 工具执行器：超时、重试、并发限制与审计
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            max_retries: 0,
            retry_backoff: Duration::from_millis(200),
            permits: None,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 与其它会话共享的工具并发信号量
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行一条 Assistant 消息中的全部 tool call，返回与调用一一对应（同序）的 ToolResult 消息
    pub async fn execute_calls(&self, calls: &[ToolCall]) -> Result<Vec<Message>, WorkflowError> {
        let results = join_all(calls.iter().map(|call| self.execute_one(call))).await;
        calls
            .iter()
            .zip(results)
            .map(|(call, result)| result.map(|content| Message::tool_result(&call.id, content)))
            .collect()
    }

    async fn execute_one(&self, call: &ToolCall) -> Result<String, WorkflowError> {
        let Some(tool) = self.registry.get(&call.name) else {
            audit(call, "unknown_tool", 0, Duration::ZERO);
            return Ok(format!(
                "Error: unknown tool `{}`. Available tools: {}",
                call.name,
                self.registry.tool_names().join(", ")
            ));
        };

        let mut attempt = 0;
        loop {
            let _permit = match &self.permits {
                Some(sem) => Some(
                    sem.clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkflowError::Cancelled)?,
                ),
                None => None,
            };

            let start = Instant::now();
            let result = match timeout(self.timeout, tool.execute(call.arguments.clone())).await {
                Ok(r) => r,
                Err(_) => Err(ToolError::Timeout),
            };
            let elapsed = start.elapsed();

            let err = match result {
                Ok(content) => {
                    audit(call, "ok", attempt, elapsed);
                    return Ok(content);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                audit(call, "invalid_arguments", attempt, elapsed);
                let detail = match err {
                    ToolError::InvalidArguments(detail) => detail,
                    other => other.to_string(),
                };
                return Ok(format!(
                    "Error: invalid arguments for `{}`: {}",
                    call.name, detail
                ));
            }

            let outcome = match err {
                ToolError::Timeout => "timeout",
                _ => "unavailable",
            };
            audit(call, outcome, attempt, elapsed);
            if attempt >= self.max_retries {
                return Err(WorkflowError::ToolUnavailable {
                    tool: call.name.clone(),
                    detail: err.to_string(),
                });
            }
            let backoff = self.retry_backoff * 2u32.saturating_pow(attempt);
            tracing::warn!(
                tool = %call.name,
                tool_call_id = %call.id,
                attempt = attempt + 1,
                "Tool call failed ({}), retrying in {:?}",
                err,
                backoff
            );
            drop(_permit);
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

fn audit(call: &ToolCall, outcome: &str, attempt: u32, elapsed: Duration) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": call.name,
        "tool_call_id": call.id,
        "ok": outcome == "ok",
        "outcome": outcome,
        "attempt": attempt,
        "duration_ms": elapsed.as_millis() as u64,
        "args_preview": args_preview(&call.arguments),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
