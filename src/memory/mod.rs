//! 记忆层：消息模型与会话持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{
    latest_feedback, latest_worker_reply, Message, Role, Session, ToolCallPayload,
    ToolResultPayload, VerdictKind,
};
pub use persistence::{
    ConversationStore, FileConversationStore, MemoryConversationStore, SessionDirectory,
};
