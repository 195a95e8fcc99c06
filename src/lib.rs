//! Sidekick - 自我反思的任务执行智能体
//!
//! Worker 使用工具完成任务，Evaluator 按用户给出的成功标准评审，
//! 未满足时带着反馈回到 Worker，直到满足、需要用户补充信息或达到迭代 / 时间上限。
//!
//! 模块划分：
//! - **agent**: 前端运行时 Sidekick（run / reset / clear_memory / resume）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排状态机、错误分类与恢复、会话监管、任务调度、构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）与重试
//! - **memory**: 消息模型与会话持久化
//! - **react**: Worker、Evaluator、澄清判定、过程事件
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{RunStatus, Sidekick};
pub use crate::core::{create_sidekick_builder, SidekickBuilder};
