//! 澄清问题判定
//!
//! Worker 的回复是否是向用户提出的澄清问题，由可插拔的 ClarificationOracle 判定：
//! - MarkerOracle：确定性规则，仅识别 `Question:` 前缀（提示词要求 Worker 提问时使用该前缀）；
//!   以问号结尾的诗句、谜语等完成的回答不算提问
//! - LlmOracle：让模型回答 YES / NO

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::core::ModelError;
use crate::llm::{LlmClient, PromptMessage};

#[async_trait]
pub trait ClarificationOracle: Send + Sync {
    async fn is_clarifying_question(&self, reply: &str) -> Result<bool, ModelError>;
}

static QUESTION_MARKER: OnceLock<Regex> = OnceLock::new();

fn question_marker() -> &'static Regex {
    QUESTION_MARKER.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\*\*)?question\s*(\*\*)?\s*[:：]").expect("valid question marker regex")
    })
}

/// 基于标记的判定
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerOracle;

impl MarkerOracle {
    pub fn new() -> Self {
        Self
    }

    pub fn matches(&self, reply: &str) -> bool {
        question_marker().is_match(reply.trim())
    }
}

#[async_trait]
impl ClarificationOracle for MarkerOracle {
    async fn is_clarifying_question(&self, reply: &str) -> Result<bool, ModelError> {
        Ok(self.matches(reply))
    }
}

const ORACLE_PROMPT: &str = "You classify assistant replies. \
Decide whether the reply below is a clarifying question addressed to the user, \
meaning the assistant cannot continue without more information from the user. \
A final answer that merely ends with an offer or a rhetorical question is not a clarifying question. \
Answer YES or NO only.";

/// 由模型判定
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClarificationOracle for LlmOracle {
    async fn is_clarifying_question(&self, reply: &str) -> Result<bool, ModelError> {
        if reply.trim().is_empty() {
            return Ok(false);
        }
        let answer = self
            .llm
            .complete(&[
                PromptMessage::system(ORACLE_PROMPT),
                PromptMessage::user(format!("Reply:\n{reply}")),
            ])
            .await?;
        Ok(answer.trim().to_uppercase().starts_with("YES"))
    }
}
