//! 运行状态定义
//!
//! 每次 run 是一个显式状态机：Running（内部再分 Work / Evaluate 两个阶段）→ AwaitingUser 或 Done。

use serde::Serialize;

use crate::memory::Message;

/// 对外可见的运行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    /// 本次 run 结束，等待用户补充信息
    AwaitingUser,
    Done,
}

/// run 结束的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Evaluator 判定满足成功标准
    Satisfied,
    /// Worker 向用户提出澄清问题
    WorkerQuestion,
    /// Evaluator 判定需要用户输入
    EvaluatorNeedsInput,
    /// 达到迭代上限，最后一次判定仍为不满足
    IterationCap,
    /// 超出单次 run 的时间预算
    TimeBudget,
}

impl StopReason {
    pub fn state(self) -> RunState {
        match self {
            StopReason::WorkerQuestion | StopReason::EvaluatorNeedsInput => RunState::AwaitingUser,
            _ => RunState::Done,
        }
    }
}

/// Running 内部阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Work,
    Evaluate,
}

/// 一次 run 的结果：终态、原因、Worker 迭代次数、完整历史（输入历史 + 本次追加）
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub state: RunState,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub history: Vec<Message>,
}
