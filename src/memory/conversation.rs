//! 会话数据模型：消息与会话
//!
//! 消息按顺序追加、从不修改或删除；只有显式清空记忆才会重置。
//! Session = 有序消息 + 最近一次的成功标准，是持久化的基本单位。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Worker,
    Evaluator,
    Tool,
}

/// Evaluator 消息上的判定标记
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Satisfied,
    Unsatisfied,
    NeedsUserInput,
}

/// 工具调用载荷：能力名 + 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub name: String,
    pub arguments: Value,
}

/// 工具结果载荷：输出文本或错误文本
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictKind>,
    /// 运行期致命错误的显式标记
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_call: None,
            tool_result: None,
            verdict: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn worker(content: impl Into<String>) -> Self {
        Self::new(Role::Worker, content)
    }

    pub fn evaluator(content: impl Into<String>, verdict: VerdictKind) -> Self {
        let mut msg = Self::new(Role::Evaluator, content);
        msg.verdict = Some(verdict);
        msg
    }

    /// 编排器生成的说明（如时间预算耗尽），不带判定
    pub fn note(content: impl Into<String>) -> Self {
        Self::new(Role::Evaluator, content)
    }

    /// 一次工具调用及其结果
    pub fn tool(call: ToolCallPayload, result: ToolResultPayload) -> Self {
        let content = if result.is_error {
            format!("[{}] Error: {}", call.name, result.output)
        } else {
            format!("[{}] {}", call.name, result.output)
        };
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call = Some(call);
        msg.tool_result = Some(result);
        msg
    }

    /// 致命错误消息，使会话仍可继续
    pub fn error(content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Worker, content);
        msg.is_error = true;
        msg
    }

    pub fn is_worker_reply(&self) -> bool {
        self.role == Role::Worker && !self.is_error
    }
}

/// 最近一条 Worker 文本回复（跳过工具消息与错误消息）
pub fn latest_worker_reply(history: &[Message]) -> Option<&Message> {
    history.iter().rev().find(|m| m.is_worker_reply())
}

/// 本轮任务中最近一次 unsatisfied 的评审反馈；遇到 user 消息即停止（新任务不继承旧反馈）
pub fn latest_feedback(history: &[Message]) -> Option<&str> {
    for msg in history.iter().rev() {
        match msg.role {
            Role::User => return None,
            Role::Evaluator if msg.verdict == Some(VerdictKind::Unsatisfied) => {
                return Some(msg.content.as_str());
            }
            _ => {}
        }
    }
    None
}

/// 持久化单元：有序消息 + 最近一次成功标准
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub criteria: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.criteria.is_empty()
    }
}
