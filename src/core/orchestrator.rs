//! 编排器：Worker / Evaluator 超步循环
//!
//! 显式状态机：Running(Work) → Running(Evaluate) → Running(Work) ... → AwaitingUser | Done。
//! 每个步骤的消息要么全部提交（写入 store 并追加到历史），要么整体丢弃；
//! 取消只在步骤之间检查；整个 run 受 max_run_time 限制，超时的步骤被丢弃并追加一条说明。
//! 被丢弃的步骤中已经执行完的工具（如 write_file）不会回滚，也不会留下工具消息，
//! 说明文字会提示这一点。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::state::Phase;
use crate::core::{AgentError, OrchestrationError, RunFailure, RunOutcome, StopReason};
use crate::memory::{ConversationStore, Message, VerdictKind};
use crate::react::events::{send_event, EventSender, SidekickEvent};
use crate::react::{EvaluatorStep, WorkerStep};

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// 每次 run 最多的 Worker 迭代次数（至少 1）
    pub max_iterations: u32,
    /// 每次 run 的总时间预算
    pub max_run_time: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_run_time: Duration::from_secs(300),
        }
    }
}

/// 一次 run 的输入
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub task: String,
    pub criteria: String,
    /// 已有历史（通常已包含本次任务的用户消息）
    pub history: Vec<Message>,
    pub cancel_token: CancellationToken,
}

impl RunRequest {
    pub fn new(task: impl Into<String>, criteria: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            task: task.into(),
            criteria: criteria.into(),
            history,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }
}

pub struct Orchestrator {
    worker: Arc<dyn WorkerStep>,
    evaluator: Arc<dyn EvaluatorStep>,
    config: OrchestratorConfig,
    event_tx: Option<EventSender>,
}

impl Orchestrator {
    pub fn new(
        worker: Arc<dyn WorkerStep>,
        evaluator: Arc<dyn EvaluatorStep>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            worker,
            evaluator,
            config,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 提交一个步骤的消息：先持久化（失败只记录），再追加到内存历史
    async fn commit(store: &dyn ConversationStore, history: &mut Vec<Message>, messages: Vec<Message>) {
        if let Err(e) = store.append(&messages).await {
            tracing::warn!(error = %e, count = messages.len(), "failed to persist step messages");
        }
        history.extend(messages);
    }

    async fn stop_for_time_budget(
        &self,
        store: &dyn ConversationStore,
        history: &mut Vec<Message>,
        iteration: u32,
    ) -> StopReason {
        let secs = self.config.max_run_time.as_secs_f64();
        tracing::warn!(iteration, budget_secs = secs, "run time budget exhausted");
        let note = Message::note(format!(
            "This run was stopped after reaching its time limit of {secs:.0}s. \
             The step in progress was discarded: tools it had already run (for example file writes) \
             may have taken effect without being recorded here. The answer above may be incomplete."
        ));
        Self::commit(store, history, vec![note]).await;
        StopReason::TimeBudget
    }

    pub async fn run(
        &self,
        store: &dyn ConversationStore,
        request: RunRequest,
    ) -> Result<RunOutcome, RunFailure> {
        let RunRequest {
            task,
            criteria,
            mut history,
            cancel_token,
        } = request;
        let max = self.config.max_iterations.max(1);
        let deadline = Instant::now() + self.config.max_run_time;
        let mut phase = Phase::Work;
        let mut iteration: u32 = 0;

        let stop_reason = loop {
            if cancel_token.is_cancelled() {
                tracing::info!(iteration, "run cancelled");
                return Err(RunFailure::new(AgentError::Cancelled, history));
            }
            if Instant::now() >= deadline {
                break self.stop_for_time_budget(store, &mut history, iteration).await;
            }

            match phase {
                Phase::Work => {
                    iteration += 1;
                    tracing::info!(iteration, max, "worker step");
                    send_event(
                        self.event_tx.as_ref(),
                        SidekickEvent::IterationStarted { iteration, max },
                    );
                    let output = match timeout_at(deadline, self.worker.run(&task, &criteria, &history)).await {
                        Err(_) => break self.stop_for_time_budget(store, &mut history, iteration).await,
                        Ok(Err(e)) => {
                            tracing::error!(iteration, error = %e, "worker step failed");
                            return Err(RunFailure::new(e, history));
                        }
                        Ok(Ok(output)) => output,
                    };
                    let asks_user = output.requests_user_input;
                    Self::commit(store, &mut history, output.messages).await;
                    if asks_user {
                        break StopReason::WorkerQuestion;
                    }
                    phase = Phase::Evaluate;
                }
                Phase::Evaluate => {
                    let verdict = match timeout_at(deadline, self.evaluator.run(&criteria, &history)).await {
                        Err(_) => break self.stop_for_time_budget(store, &mut history, iteration).await,
                        Ok(Err(e)) => {
                            tracing::error!(iteration, error = %e, "evaluator step failed");
                            return Err(RunFailure::new(e, history));
                        }
                        Ok(Ok(verdict)) => verdict,
                    };
                    let kind = verdict.kind();
                    tracing::info!(iteration, verdict = ?kind, "evaluator verdict");
                    send_event(
                        self.event_tx.as_ref(),
                        SidekickEvent::Verdict {
                            kind,
                            feedback: verdict.text().to_string(),
                        },
                    );
                    Self::commit(store, &mut history, vec![verdict.into_message()]).await;

                    match kind {
                        VerdictKind::Satisfied => break StopReason::Satisfied,
                        VerdictKind::NeedsUserInput => break StopReason::EvaluatorNeedsInput,
                        VerdictKind::Unsatisfied if iteration < max => phase = Phase::Work,
                        VerdictKind::Unsatisfied => {
                            tracing::warn!(
                                error = %OrchestrationError::IterationCapExceeded { max },
                                "returning best effort answer"
                            );
                            break StopReason::IterationCap;
                        }
                    }
                }
            }
        };

        let state = stop_reason.state();
        send_event(self.event_tx.as_ref(), SidekickEvent::Finished { state });
        tracing::info!(iterations = iteration, ?state, ?stop_reason, "run finished");
        Ok(RunOutcome {
            state,
            stop_reason,
            iterations: iteration,
            history,
        })
    }
}
