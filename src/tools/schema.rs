//! 工具调用格式与 JSON Schema 生成（schemars）
//!
//! Worker 以 `{"tool": "...", "args": {...}}` 或 `{"tool_calls": [...]}` 请求工具；
//! 该结构的 Schema 注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::ToolCallPayload;

/// 单次工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCall {
    /// 工具名，如 search、read_file、python、calculator
    pub tool: String,
    /// 工具参数，按该工具的 parameters schema 填写
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    pub fn to_payload(&self) -> ToolCallPayload {
        ToolCallPayload {
            name: self.tool.clone(),
            arguments: self.args.clone(),
        }
    }
}

/// 一轮中并发执行的多个工具调用（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatch {
    /// 彼此独立、可并发执行的调用，结果按此顺序返回
    tool_calls: Vec<ToolCall>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let single = schema_for!(ToolCall);
    let batch = schema_for!(ToolCallBatch);
    let both = serde_json::json!({ "single": single, "batch": batch });
    serde_json::to_string_pretty(&both).unwrap_or_default()
}
