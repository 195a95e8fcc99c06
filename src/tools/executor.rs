//! 工具执行器
//!
//! 持有 ToolRegistry、单次调用超时与并发调度器；invoke 从不失败，失败都装进 ToolInvocation.result，
//! 由 Worker 原样写回会话。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{TaskScheduler, ToolError};
use crate::memory::{Message, ToolResultPayload};
use crate::tools::{ToolCall, ToolRegistry};

/// 一次工具调用的完整记录
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub result: Result<String, ToolError>,
}

impl ToolInvocation {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// 结果文本（失败时为错误描述）
    pub fn output_text(&self) -> String {
        match &self.result {
            Ok(out) => out.clone(),
            Err(e) => e.to_string(),
        }
    }

    pub fn into_message(self) -> Message {
        let payload = match &self.result {
            Ok(out) => ToolResultPayload {
                output: out.clone(),
                is_error: false,
            },
            Err(e) => ToolResultPayload {
                output: e.to_string(),
                is_error: true,
            },
        };
        Message::tool(self.call.to_payload(), payload)
    }
}

/// 工具执行器：超时 + 输出截断 + 并发限制 + 审计日志
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_result_chars: usize,
    scheduler: Arc<TaskScheduler>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            max_result_chars: 8000,
            scheduler: Arc::new(TaskScheduler::default()),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max.max(1);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个调用；超时记为 ExecutionFailed
    pub async fn invoke(&self, call: &ToolCall) -> ToolInvocation {
        let _permit = self.scheduler.acquire_tool().await;
        let start = Instant::now();
        let result = match timeout(self.timeout, self.registry.invoke(&call.tool, call.args.clone())).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::ExecutionFailed {
                tool: call.tool.clone(),
                cause: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        };
        let result = result.map(|out| truncate_output(out, self.max_result_chars));

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::UnknownCapability(_)) => "unknown_capability",
            Err(ToolError::InvalidArguments { .. }) => "invalid_arguments",
            Err(ToolError::ExecutionFailed { .. }) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolInvocation {
            call: call.clone(),
            result,
        }
    }

    /// 并发执行一批独立调用，结果保持请求顺序
    pub async fn invoke_all(&self, calls: &[ToolCall]) -> Vec<ToolInvocation> {
        join_all(calls.iter().map(|c| self.invoke(c))).await
    }
}

fn truncate_output(out: String, max_chars: usize) -> String {
    if out.chars().count() <= max_chars {
        return out;
    }
    let mut truncated: String = out.chars().take(max_chars).collect();
    truncated.push_str("\n...[truncated]");
    truncated
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
