//! Worker：执行任务的一步
//!
//! 一次 WorkerStep 可以包含多轮工具调用：模型回复 JSON 工具请求时执行工具并把结果喂回，
//! 回复纯文本时视为最终答复（或澄清问题）。工具失败只会产生一条 error 工具消息，
//! 只有模型不可达 / 重试耗尽 / 多次格式错误才会让整个步骤失败。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{ModelError, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmClient, PromptMessage};
use crate::memory::{latest_feedback, Message, Role};
use crate::react::events::{preview, send_event, EventSender, SidekickEvent};
use crate::react::ClarificationOracle;
use crate::tools::{tool_call_schema_json, ToolCall, ToolExecutor};

pub const DEFAULT_WORKER_PROMPT: &str = "You are Sidekick, a helpful assistant that uses tools to complete tasks. \
You keep working on a task until either you have a question or clarification for the user, or the success criteria are met. \
Your tools let you search the web, look things up on Wikipedia and arXiv, read and write files in your workspace, \
run Python code and evaluate arithmetic. When you run Python, include print() statements for anything you want to see.";

const REPLY_DISCIPLINE: &str = "Reply either with a question for the user about this assignment, or with your final response.
If you have a question for the user, state it clearly on a line starting with \"Question:\", for example:

Question: do you want a short summary or a detailed report?

If you have finished, reply with the final answer only and do not ask a question.";

const FINAL_ANSWER_NOW: &str = "You have used all available tool rounds for this step. \
Do not request any more tools. Reply now with your best final answer in plain text, \
or with a line starting with \"Question:\" if you need the user's input.";

const TOOL_BUDGET_EXHAUSTED: &str =
    "I was unable to produce a final answer within the tool budget for this step.";

/// 一次 WorkerStep 的结果
#[derive(Clone, Debug)]
pub struct WorkerOutput {
    /// 本步新产生的消息：工具消息在前，最后一条是 Worker 的文本回复
    pub messages: Vec<Message>,
    pub requests_user_input: bool,
}

#[async_trait]
pub trait WorkerStep: Send + Sync {
    async fn run(
        &self,
        task: &str,
        criteria: &str,
        history: &[Message],
    ) -> Result<WorkerOutput, ModelError>;
}

/// 模型回复的两种形态
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerReply {
    Answer(String),
    ToolCalls(Vec<ToolCall>),
}

/// 从 ```json 代码块中取出 JSON
fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let rest = &text[start + 7..];
    Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
}

fn malformed(reason: impl std::fmt::Display, json: &str) -> ModelError {
    ModelError::MalformedResponse(format!("{reason}: {}", preview(json, 200)))
}

/// 解析 Worker 回复
///
/// 整条回复以 `{` 开头时按严格 JSON 解析，失败即 MalformedResponse；
/// 含 ```json 代码块时尝试解析代码块，解析失败则视为普通答复。
/// JSON 中没有 `tool` / `tool_calls` 字段时也是普通答复（用户可能要求 JSON 格式的答案）。
pub fn parse_worker_output(output: &str) -> Result<WorkerReply, ModelError> {
    let trimmed = output.trim();
    let (json, strict) = if trimmed.starts_with('{') {
        (trimmed, true)
    } else if let Some(block) = fenced_json(trimmed) {
        (block, false)
    } else {
        return Ok(WorkerReply::Answer(trimmed.to_string()));
    };

    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) if strict => return Err(malformed(e, json)),
        Err(_) => return Ok(WorkerReply::Answer(trimmed.to_string())),
    };
    let Value::Object(map) = &value else {
        return Ok(WorkerReply::Answer(trimmed.to_string()));
    };

    if let Some(calls) = map.get("tool_calls") {
        let calls: Vec<ToolCall> =
            serde_json::from_value(calls.clone()).map_err(|e| malformed(e, json))?;
        if calls.is_empty() || calls.iter().any(|c| c.tool.trim().is_empty()) {
            return Err(malformed("tool_calls must name at least one tool", json));
        }
        return Ok(WorkerReply::ToolCalls(calls));
    }
    if let Some(tool) = map.get("tool") {
        let name = tool
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("\"tool\" must be a non-empty string", json))?;
        let args = map.get("args").cloned().unwrap_or(Value::Null);
        return Ok(WorkerReply::ToolCalls(vec![ToolCall::new(name, args)]));
    }
    Ok(WorkerReply::Answer(trimmed.to_string()))
}

/// 会话历史映射为提示消息；错误消息不发给模型
fn history_to_prompt(history: &[Message]) -> Vec<PromptMessage> {
    history
        .iter()
        .filter(|m| !m.is_error)
        .map(|m| match m.role {
            Role::User => PromptMessage::user(m.content.clone()),
            Role::Worker | Role::Evaluator => PromptMessage::assistant(m.content.clone()),
            Role::Tool => PromptMessage::user(format!("Tool result {}", m.content)),
        })
        .collect()
}

/// 默认 Worker 实现：LLM + 工具执行器 + 澄清判定 + 格式错误恢复
pub struct Worker {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    oracle: Arc<dyn ClarificationOracle>,
    recovery: RecoveryEngine,
    base_prompt: String,
    max_tool_rounds: u32,
    max_format_retries: u32,
    event_tx: Option<EventSender>,
}

impl Worker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        oracle: Arc<dyn ClarificationOracle>,
    ) -> Self {
        Self {
            llm,
            executor,
            oracle,
            recovery: RecoveryEngine::new(),
            base_prompt: DEFAULT_WORKER_PROMPT.to_string(),
            max_tool_rounds: 8,
            max_format_retries: 2,
            event_tx: None,
        }
    }

    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn system_prompt(&self, criteria: &str, history: &[Message]) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let criteria = if criteria.trim().is_empty() {
            "(none given; a complete, direct answer is enough)"
        } else {
            criteria
        };
        let mut prompt = format!(
            "{}\n\nThe current date and time is {now}.\n\n## Success criteria\n{criteria}\n\n{REPLY_DISCIPLINE}",
            self.base_prompt
        );

        let tools = self.executor.registry().to_schema_json();
        if self.max_tool_rounds > 0 && tools != "[]" {
            prompt.push_str(&format!(
                "\n\n## Available tools\n```json\n{tools}\n```\n\n\
                 To use tools, reply with exactly one JSON object and nothing else, matching this schema \
                 (use \"tool_calls\" for several independent calls):\n```json\n{}\n```",
                tool_call_schema_json()
            ));
        }

        if let Some(feedback) = latest_feedback(history) {
            prompt.push_str(&format!(
                "\n\n## Previous attempt rejected\n\
                 You previously thought you had completed the assignment, but your reply was rejected \
                 because the success criteria were not met. Here is the feedback:\n{feedback}\n\n\
                 Use this feedback to continue the assignment, making sure you meet the success criteria \
                 or ask the user a question."
            ));
        }
        prompt
    }

    async fn finish(&self, text: String, mut messages: Vec<Message>) -> Result<WorkerOutput, ModelError> {
        let asks_user = self.oracle.is_clarifying_question(&text).await?;
        send_event(
            self.event_tx.as_ref(),
            SidekickEvent::WorkerReply {
                preview: preview(&text, 200),
                asks_user,
            },
        );
        messages.push(Message::worker(text));
        Ok(WorkerOutput {
            messages,
            requests_user_input: asks_user,
        })
    }
}

#[async_trait]
impl WorkerStep for Worker {
    async fn run(
        &self,
        task: &str,
        criteria: &str,
        history: &[Message],
    ) -> Result<WorkerOutput, ModelError> {
        let mut prompt = vec![PromptMessage::system(self.system_prompt(criteria, history))];
        prompt.extend(history_to_prompt(history));
        let task_in_history = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .is_some_and(|m| m.content == task);
        if !task.trim().is_empty() && !task_in_history {
            prompt.push(PromptMessage::user(task));
        }

        let mut new_messages = Vec::new();
        let mut rounds: u32 = 0;
        let mut format_retries: u32 = 0;

        loop {
            let reply = self.llm.complete(&prompt).await?;
            let parsed = match parse_worker_output(&reply) {
                Ok(p) => p,
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::RetryWithPrompt(fix) if format_retries < self.max_format_retries => {
                        format_retries += 1;
                        tracing::warn!(error = %e, attempt = format_retries, "worker reply malformed, retrying");
                        prompt.push(PromptMessage::assistant(reply));
                        prompt.push(PromptMessage::user(fix));
                        continue;
                    }
                    _ => return Err(e),
                },
            };

            match parsed {
                WorkerReply::Answer(text) => return self.finish(text, new_messages).await,
                WorkerReply::ToolCalls(_) if rounds >= self.max_tool_rounds => {
                    tracing::warn!(rounds, "worker still requesting tools after the final round");
                    return self.finish(TOOL_BUDGET_EXHAUSTED.to_string(), new_messages).await;
                }
                WorkerReply::ToolCalls(calls) => {
                    rounds += 1;
                    tracing::info!(round = rounds, calls = calls.len(), "worker tool round");
                    prompt.push(PromptMessage::assistant(reply));
                    for call in &calls {
                        send_event(
                            self.event_tx.as_ref(),
                            SidekickEvent::ToolCall {
                                tool: call.tool.clone(),
                                args: call.args.clone(),
                            },
                        );
                    }
                    for inv in self.executor.invoke_all(&calls).await {
                        let text = inv.output_text();
                        send_event(
                            self.event_tx.as_ref(),
                            SidekickEvent::ToolResult {
                                tool: inv.call.tool.clone(),
                                ok: inv.is_ok(),
                                preview: preview(&text, 200),
                            },
                        );
                        let status = if inv.is_ok() { "" } else { " (error)" };
                        prompt.push(PromptMessage::user(format!(
                            "Tool result from {}{status}:\n{text}",
                            inv.call.tool
                        )));
                        new_messages.push(inv.into_message());
                    }
                    if rounds >= self.max_tool_rounds {
                        prompt.push(PromptMessage::user(FINAL_ANSWER_NOW));
                    }
                }
            }
        }
    }
}
