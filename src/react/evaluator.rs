//! Evaluator：判定 Worker 最近一次回复是否满足成功标准
//!
//! 判定规则依次为：
//! 1. 最近回复是向用户的澄清问题 → NeedsUserInput
//! 2. 没有成功标准 → 非空回复即 Satisfied，空回复 Unsatisfied
//! 3. 否则由模型按成功标准给出 JSON 评审 → Satisfied / Unsatisfied(feedback)
//!
//! Evaluator 只返回 Verdict，从不修改历史。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::ModelError;
use crate::llm::{LlmClient, PromptMessage};
use crate::memory::{latest_feedback, latest_worker_reply, Message, Role, VerdictKind};
use crate::react::ClarificationOracle;

pub const DEFAULT_EVALUATOR_PROMPT: &str = "You are an evaluator that determines whether a task has been completed successfully by an Assistant. \
Assess the Assistant's last response against the given success criteria. \
Reply with a JSON object with two fields: \"feedback\" (a short explanation of your verdict, \
with concrete guidance when the criteria are not met) and \"success_criteria_met\" (true or false). \
Output only the JSON object.";

const FEEDBACK_PREFIX: &str = "Evaluator Feedback on this answer: ";

/// 单次评审的结论
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Satisfied { remarks: String },
    Unsatisfied { feedback: String },
    NeedsUserInput { reason: String },
}

impl Verdict {
    pub fn kind(&self) -> VerdictKind {
        match self {
            Verdict::Satisfied { .. } => VerdictKind::Satisfied,
            Verdict::Unsatisfied { .. } => VerdictKind::Unsatisfied,
            Verdict::NeedsUserInput { .. } => VerdictKind::NeedsUserInput,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Verdict::Satisfied { remarks } => remarks,
            Verdict::Unsatisfied { feedback } => feedback,
            Verdict::NeedsUserInput { reason } => reason,
        }
    }

    pub fn into_message(self) -> Message {
        Message::evaluator(format!("{FEEDBACK_PREFIX}{}", self.text()), self.kind())
    }
}

#[async_trait]
pub trait EvaluatorStep: Send + Sync {
    async fn run(&self, criteria: &str, history: &[Message]) -> Result<Verdict, ModelError>;
}

/// 模型返回的结构化评审
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Evaluation {
    /// 对回复的评价
    pub feedback: String,
    /// 是否满足成功标准
    pub success_criteria_met: bool,
}

/// 提取 JSON：优先 ```json 代码块，否则取首个 `{` 到最后一个 `}`
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_evaluation(output: &str) -> Result<Evaluation, ModelError> {
    let json = extract_json(output).ok_or_else(|| {
        ModelError::MalformedResponse(format!("evaluator reply is not JSON: {}", output.trim()))
    })?;
    serde_json::from_str(json)
        .map_err(|e| ModelError::MalformedResponse(format!("evaluator JSON invalid: {e}")))
}

/// 对话格式化为评审上下文：User / Assistant 行，工具调用显示为 [Tools use]
fn format_conversation(history: &[Message]) -> String {
    let mut out = String::from("Conversation history:\n\n");
    let mut last_was_tool = false;
    for m in history.iter().filter(|m| !m.is_error) {
        match m.role {
            Role::User => out.push_str(&format!("User: {}\n", m.content)),
            Role::Worker => out.push_str(&format!("Assistant: {}\n", m.content)),
            Role::Tool if !last_was_tool => out.push_str("Assistant: [Tools use]\n"),
            Role::Tool | Role::Evaluator => {}
        }
        last_was_tool = m.role == Role::Tool;
    }
    out
}

/// 默认 Evaluator 实现
pub struct Evaluator {
    llm: Arc<dyn LlmClient>,
    oracle: Arc<dyn ClarificationOracle>,
    system_prompt: String,
}

impl Evaluator {
    pub fn new(llm: Arc<dyn LlmClient>, oracle: Arc<dyn ClarificationOracle>) -> Self {
        Self {
            llm,
            oracle,
            system_prompt: DEFAULT_EVALUATOR_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn user_prompt(&self, criteria: &str, history: &[Message], last_response: &str) -> String {
        let mut prompt = format!(
            "You are evaluating a conversation between the User and Assistant. \
             You decide what action to take based on the last response from the Assistant.\n\n\
             The entire conversation with the assistant, with the user's original request and all replies, is:\n\
             {}\n\
             The success criteria for this assignment is:\n{criteria}\n\n\
             And the final response from the Assistant that you are evaluating is:\n{last_response}\n\n\
             Respond with your feedback, and decide if the success criteria is met by this response.\n\
             The Assistant has access to a tool to write files. If the Assistant says they have written a file, \
             then you can assume they have done so. Overall you should give the Assistant the benefit of the doubt \
             if they say they've done something. But you should reject if you feel that more work should go into this.",
            format_conversation(history)
        );
        if let Some(previous) = latest_feedback(history) {
            prompt.push_str(&format!(
                "\n\nAlso, note that in a prior attempt from the Assistant, you provided this feedback: {}\n\
                 If you're seeing the Assistant repeating the same mistakes, say so in your feedback.",
                previous.trim_start_matches(FEEDBACK_PREFIX)
            ));
        }
        prompt
    }
}

#[async_trait]
impl EvaluatorStep for Evaluator {
    async fn run(&self, criteria: &str, history: &[Message]) -> Result<Verdict, ModelError> {
        let Some(reply) = latest_worker_reply(history) else {
            return Ok(Verdict::Unsatisfied {
                feedback: "There is no answer from the assistant yet. Please answer the request.".to_string(),
            });
        };
        let reply = reply.content.trim();

        if self.oracle.is_clarifying_question(reply).await? {
            return Ok(Verdict::NeedsUserInput {
                reason: "The assistant asked a clarifying question; waiting for the user's reply.".to_string(),
            });
        }

        if criteria.trim().is_empty() {
            return Ok(if reply.is_empty() {
                Verdict::Unsatisfied {
                    feedback: "The reply is empty. Please provide a complete answer.".to_string(),
                }
            } else {
                Verdict::Satisfied {
                    remarks: "No success criteria were given; the answer is complete.".to_string(),
                }
            });
        }

        let raw = self
            .llm
            .complete(&[
                PromptMessage::system(self.system_prompt.clone()),
                PromptMessage::user(self.user_prompt(criteria, history, reply)),
            ])
            .await?;
        let evaluation = parse_evaluation(&raw)?;
        tracing::info!(met = evaluation.success_criteria_met, "evaluation");

        Ok(if evaluation.success_criteria_met {
            Verdict::Satisfied {
                remarks: evaluation.feedback,
            }
        } else {
            Verdict::Unsatisfied {
                feedback: evaluation.feedback,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::react::MarkerOracle;

    fn evaluator(llm: Arc<ScriptedLlmClient>) -> Evaluator {
        Evaluator::new(llm, Arc::new(MarkerOracle::new()))
    }

    #[tokio::test]
    async fn test_question_needs_user_input_without_model_call() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let history = vec![Message::user("plan a trip"), Message::worker("Question: where to?")];
        let verdict = evaluator(llm.clone()).run("a full itinerary", &history).await.unwrap();
        assert_eq!(verdict.kind(), VerdictKind::NeedsUserInput);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_criteria_rules() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let eval = evaluator(llm.clone());
        let ok = eval
            .run("", &[Message::user("hi"), Message::worker("Hello!")])
            .await
            .unwrap();
        assert_eq!(ok.kind(), VerdictKind::Satisfied);
        let empty = eval
            .run("", &[Message::user("hi"), Message::worker("   ")])
            .await
            .unwrap();
        assert_eq!(empty.kind(), VerdictKind::Unsatisfied);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_criteria_judged_by_model() {
        let llm = Arc::new(ScriptedLlmClient::replies([
            "```json\n{\"feedback\": \"Only two lines.\", \"success_criteria_met\": false}\n```",
        ]));
        let history = vec![Message::user("haiku"), Message::worker("line one\nline two")];
        let verdict = evaluator(llm.clone()).run("exactly 3 lines", &history).await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Unsatisfied {
                feedback: "Only two lines.".into()
            }
        );
        let prompt = &llm.prompts()[0][1].content;
        assert!(prompt.contains("User: haiku"));
        assert!(prompt.contains("exactly 3 lines"));
    }

    #[tokio::test]
    async fn test_malformed_evaluation() {
        let llm = Arc::new(ScriptedLlmClient::replies(["looks good to me"]));
        let history = vec![Message::user("x"), Message::worker("y")];
        let err = evaluator(llm).run("z", &history).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }

    #[test]
    fn test_verdict_message() {
        let msg = Verdict::Unsatisfied {
            feedback: "too short".into(),
        }
        .into_message();
        assert_eq!(msg.role, Role::Evaluator);
        assert_eq!(msg.verdict, Some(VerdictKind::Unsatisfied));
        assert_eq!(msg.content, "Evaluator Feedback on this answer: too short");
    }

    #[test]
    fn test_format_conversation_collapses_tool_turns() {
        let tool = Message::tool(
            crate::memory::ToolCallPayload {
                name: "search".into(),
                arguments: serde_json::Value::Null,
            },
            crate::memory::ToolResultPayload {
                output: "r".into(),
                is_error: false,
            },
        );
        let text = format_conversation(&[Message::user("q"), tool.clone(), tool, Message::worker("a")]);
        assert_eq!(
            text,
            "Conversation history:\n\nUser: q\nAssistant: [Tools use]\nAssistant: a\n"
        );
    }
}
