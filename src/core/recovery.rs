//! 错误恢复引擎
//!
//! 根据 ModelError 类型返回 RecoveryAction：输出格式错误时注入纠正提示重试，其余终止当前步骤。
//! 网络类错误的重试由 RetryingLlmClient 负责，这里不再重复。

use crate::core::{ModelError, RecoveryAction};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ModelError) -> RecoveryAction {
        match err {
            ModelError::MalformedResponse(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed: {raw}. \
                To call a tool, reply with exactly one JSON object and nothing else, \
                in the form {{\"tool\": \"tool_name\", \"args\": {{...}}}} \
                or {{\"tool_calls\": [{{\"tool\": \"...\", \"args\": {{...}}}}]}}. \
                Otherwise reply with plain text: either your final answer or a line starting with \"Question:\"."
            )),
            ModelError::Unreachable(_) | ModelError::ExhaustedRetries { .. } => RecoveryAction::Abort,
        }
    }
}
