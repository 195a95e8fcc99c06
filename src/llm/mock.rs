//! 离线 LLM 客户端
//!
//! - MockLlmClient：无需 API，按提示类型给出固定回复，便于本地跑通 Worker / Evaluator 循环
//! - ScriptedLlmClient：按预设脚本逐条返回结果并记录每次收到的提示，供测试断言调用次数与内容

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::ModelError;
use crate::llm::{ChatRole, LlmClient, PromptMessage};

/// Mock 客户端：评审提示返回“满足”，澄清判定返回 NO，其余回显最后一条用户消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ModelError> {
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if system.contains("success_criteria_met") {
            return Ok(
                r#"{"feedback": "Mock evaluation: accepted.", "success_criteria_met": true}"#
                    .to_string(),
            );
        }
        if system.contains("Answer YES or NO") {
            return Ok("NO".to_string());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Mock reply: {last_user}"))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：每次 complete 弹出一条预设结果；脚本耗尽时返回 MalformedResponse
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 全部成功回复的便捷构造
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn push(&self, reply: Result<String, ModelError>) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// 所有已收到的提示（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ModelError> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(messages.to_vec());
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::MalformedResponse("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let out = MockLlmClient
            .complete(&[PromptMessage::system("be helpful"), PromptMessage::user("ping")])
            .await
            .unwrap();
        assert_eq!(out, "Mock reply: ping");
    }

    #[tokio::test]
    async fn test_scripted_records_prompts_and_exhausts() {
        let client = ScriptedLlmClient::replies(["one"]);
        assert_eq!(client.complete(&[PromptMessage::user("a")]).await.unwrap(), "one");
        assert!(client.complete(&[PromptMessage::user("b")]).await.is_err());
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.prompts()[1][0].content, "b");
    }
}
