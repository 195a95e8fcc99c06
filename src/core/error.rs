//! 错误分类与恢复动作
//!
//! - ToolError：工具调用失败，由 Worker 捕获并写成 tool 消息，不中断运行
//! - ModelError：模型调用失败，对当前 run 致命，向调用方传播
//! - PersistenceError：会话持久化失败，始终降级为空会话并记录日志
//! - OrchestrationError：达到迭代上限，非致命，以 DONE 结束
//!
//! 与 RecoveryEngine 配合：根据 ModelError 决定 RetryWithPrompt / Abort。

use thiserror::Error;

use crate::memory::Message;

/// 工具调用错误（注册表解析、参数校验、执行）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {cause}")]
    ExecutionFailed { tool: String, cause: String },
}

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model unreachable: {0}")]
    Unreachable(String),

    #[error("Model retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

impl ModelError {
    /// 网络类错误可重试；格式错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Unreachable(_))
    }
}

/// 会话持久化错误；调用方只记录日志，不中止运行
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Corrupt session state at {path}: {reason}")]
    CorruptState { path: String, reason: String },

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 编排层错误；只用于日志与结果说明，不会向调用方返回
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Iteration cap of {max} reached without satisfying the success criteria")]
    IterationCapExceeded { max: u32 },
}

/// 对单次 run 致命的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// 致命错误 + 出错前已经提交的历史，供前端追加错误消息后继续会话
#[derive(Error, Debug)]
#[error("{error}")]
pub struct RunFailure {
    pub error: AgentError,
    pub history: Vec<Message>,
}

impl RunFailure {
    pub fn new(error: impl Into<AgentError>, history: Vec<Message>) -> Self {
        Self {
            error: error.into(),
            history,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将纠正提示注入下一次模型调用（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前步骤，错误向上传播
    Abort,
}
