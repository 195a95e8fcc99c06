//! 运行过程事件：供前端实时展示迭代、工具调用、回复与判定

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::RunState;
use crate::memory::VerdictKind;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidekickEvent {
    /// 新一轮 Worker 迭代开始
    IterationStarted { iteration: u32, max: u32 },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        tool: String,
        ok: bool,
        preview: String,
    },
    WorkerReply { preview: String, asks_user: bool },
    Verdict { kind: VerdictKind, feedback: String },
    Finished { state: RunState },
    Error { text: String },
}

pub type EventSender = mpsc::UnboundedSender<SidekickEvent>;

/// 发送事件；接收端已关闭时静默忽略
pub(crate) fn send_event(tx: Option<&EventSender>, event: SidekickEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// 截断为预览文本（按字符）
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
