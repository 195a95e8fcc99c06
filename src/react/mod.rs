//! 认知层：Worker、Evaluator、澄清判定与过程事件

pub mod evaluator;
pub mod events;
pub mod oracle;
pub mod worker;

pub use evaluator::{
    parse_evaluation, Evaluation, Evaluator, EvaluatorStep, Verdict, DEFAULT_EVALUATOR_PROMPT,
};
pub use events::{EventSender, SidekickEvent};
pub use oracle::{ClarificationOracle, LlmOracle, MarkerOracle};
pub use worker::{
    parse_worker_output, Worker, WorkerOutput, WorkerReply, WorkerStep, DEFAULT_WORKER_PROMPT,
};
