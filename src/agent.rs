//! 前端运行时：Sidekick
//!
//! 供 REPL / UI 调用的唯一入口 `run(task, criteria, history) → 更新后的历史`：
//! 追加用户消息、驱动编排器、把致命错误变成一条可见的错误消息，保证会话可以继续。
//! 同一会话的 run 串行执行；reset 只清内存中的瞬时状态，clear_memory 清除持久化会话。

use std::sync::{Arc, Mutex};

use crate::core::{
    Orchestrator, RunFailure, RunRequest, RunState, SessionSupervisor, StopReason,
};
use crate::memory::{ConversationStore, Message, Session};
use crate::react::events::send_event;
use crate::react::{EventSender, SidekickEvent};
use crate::tools::ToolRegistry;

/// 最近一次 run 的瞬时状态
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub state: Option<RunState>,
    pub stop_reason: Option<StopReason>,
    pub iterations: u32,
    pub last_error: Option<String>,
}

pub struct Sidekick {
    orchestrator: Orchestrator,
    store: Arc<dyn ConversationStore>,
    supervisor: SessionSupervisor,
    registry: Arc<ToolRegistry>,
    /// 同一会话同时只允许一个 run
    run_guard: tokio::sync::Mutex<()>,
    status: Mutex<RunStatus>,
    event_tx: Option<EventSender>,
}

impl Sidekick {
    pub fn new(
        orchestrator: Orchestrator,
        store: Arc<dyn ConversationStore>,
        registry: Arc<ToolRegistry>,
        event_tx: Option<EventSender>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            supervisor: SessionSupervisor::new(),
            registry,
            run_guard: tokio::sync::Mutex::new(()),
            status: Mutex::new(RunStatus::default()),
            event_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 读取持久化会话，供 UI 恢复显示
    pub async fn resume(&self) -> Session {
        self.store.load().await
    }

    async fn persist(&self, messages: &[Message]) {
        if let Err(e) = self.store.append(messages).await {
            tracing::warn!(error = %e, "failed to persist messages");
        }
    }

    fn set_status(&self, status: RunStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// 运行一次任务，返回更新后的完整历史
    ///
    /// 模型错误等致命错误不会向外抛出：出错前已提交的消息保留，并追加一条 is_error 消息。
    pub async fn run(&self, task: &str, criteria: &str, history: Vec<Message>) -> Vec<Message> {
        let _guard = self.run_guard.lock().await;
        let cancel_token = self.supervisor.begin_run();

        if let Err(e) = self.store.set_criteria(criteria).await {
            tracing::warn!(error = %e, "failed to persist criteria");
        }

        let mut history = history;
        if !task.trim().is_empty() {
            let user = Message::user(task);
            self.persist(std::slice::from_ref(&user)).await;
            history.push(user);
        }

        let request = RunRequest::new(task, criteria, history).with_cancel_token(cancel_token);
        match self.orchestrator.run(self.store.as_ref(), request).await {
            Ok(outcome) => {
                self.set_status(RunStatus {
                    state: Some(outcome.state),
                    stop_reason: Some(outcome.stop_reason),
                    iterations: outcome.iterations,
                    last_error: None,
                });
                outcome.history
            }
            Err(RunFailure { error, mut history }) => {
                let text = format!("Error: {error}");
                tracing::error!(error = %error, "run failed");
                send_event(self.event_tx.as_ref(), SidekickEvent::Error { text: text.clone() });
                let msg = Message::error(text.clone());
                self.persist(std::slice::from_ref(&msg)).await;
                history.push(msg);
                self.set_status(RunStatus {
                    state: Some(RunState::Done),
                    stop_reason: None,
                    iterations: 0,
                    last_error: Some(text),
                });
                history
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn last_state(&self) -> Option<RunState> {
        self.status().state
    }

    /// 只清内存中的瞬时状态，不动持久化会话
    pub fn reset(&self) {
        self.supervisor.cancel();
        self.set_status(RunStatus::default());
    }

    /// 清除持久化会话；之后 resume 返回空会话
    pub async fn clear_memory(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "failed to clear session");
        }
        self.set_status(RunStatus::default());
    }

    /// 请求取消；正在进行的 run 在下一个步骤边界停止
    pub fn cancel(&self) {
        self.supervisor.cancel();
    }

    /// 释放外部资源（如浏览器）
    pub async fn free_resources(&self) {
        self.supervisor.cancel();
        self.registry.shutdown_all().await;
    }
}
