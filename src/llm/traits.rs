//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 脚本化）实现 LlmClient::complete；
//! RetryingLlmClient 为任意后端加上指数退避重试（仅对网络类错误）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ModelError;

/// 提示消息角色（与会话 Role 分离：会话里的 worker/evaluator/tool 在组装提示时映射到这三类）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 发给模型的一条提示消息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ModelError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试策略
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    /// 首次退避时长，之后每次翻倍
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// 带重试的客户端包装：只重试 Unreachable，重试耗尽后返回 ExhaustedRetries
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ModelError> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.inner.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if self.config.max_retries == 0 => return Err(e),
                Err(e) if attempt > self.config.max_retries => {
                    return Err(ModelError::ExhaustedRetries {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        model = %self.inner.model_name(),
                        attempt,
                        error = %e,
                        "LLM call failed, retrying in {}ms",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let inner = Arc::new(ScriptedLlmClient::new(vec![
            Err(ModelError::Unreachable("connection reset".into())),
            Ok("hello".into()),
        ]));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(2));
        let out = client.complete(&[PromptMessage::user("hi")]).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(inner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let inner = Arc::new(ScriptedLlmClient::new(vec![
            Err(ModelError::Unreachable("down".into())),
            Err(ModelError::Unreachable("down".into())),
            Err(ModelError::Unreachable("still down".into())),
        ]));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(2));
        let err = client.complete(&[PromptMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ModelError::ExhaustedRetries { attempts: 3, .. }));
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let inner = Arc::new(ScriptedLlmClient::new(vec![Err(
            ModelError::MalformedResponse("empty".into()),
        )]));
        let client = RetryingLlmClient::new(inner.clone(), fast_retry(3));
        let err = client.complete(&[PromptMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
        assert_eq!(inner.call_count(), 1);
    }
}
