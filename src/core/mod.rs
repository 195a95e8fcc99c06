//! 核心编排层：错误与恢复、运行状态、会话监管、任务调度、主控循环与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::{create_sidekick_builder, SidekickBuilder};
pub use error::{
    AgentError, ModelError, OrchestrationError, PersistenceError, RecoveryAction, RunFailure,
    ToolError,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunRequest};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{RunOutcome, RunState, StopReason};
pub use task_scheduler::TaskScheduler;
