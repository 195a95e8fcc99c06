//! 会话持久化
//!
//! ConversationStore 抽象 load / append / set_criteria / clear：
//! - FileConversationStore：单文件 JSON（默认 sidekick_memory.json），先写临时文件再 rename，不会留下半条消息
//! - MemoryConversationStore：进程内实现，供测试使用
//! - SessionDirectory：按会话 ID 分文件，同一会话共享一把锁（会话内串行、会话间并行）
//!
//! 文件缺失或损坏时视为空会话并记录 warn，从不让整个进程失败。

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::core::PersistenceError;
use crate::memory::{Message, Session};

/// 会话存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 读取会话；不存在或损坏时返回空会话
    async fn load(&self) -> Session;

    /// 按顺序追加一批消息（同一会话内串行）
    async fn append(&self, messages: &[Message]) -> Result<(), PersistenceError>;

    /// 记录最近一次的成功标准
    async fn set_criteria(&self, criteria: &str) -> Result<(), PersistenceError>;

    /// 删除持久化状态；之后 load 返回空会话
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// 单文件 JSON 会话存储
#[derive(Debug, Clone)]
pub struct FileConversationStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileConversationStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_lock(path, Arc::new(Mutex::new(())))
    }

    fn with_lock(path: impl AsRef<Path>, lock: Arc<Mutex<()>>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Session, PersistenceError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Session::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Session::new());
        }
        serde_json::from_str(&data).map_err(|e| PersistenceError::CorruptState {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// 读取用于改写的会话：损坏时降级为空会话（随后的写入会覆盖损坏文件）
    async fn read_for_update(&self) -> Result<Session, PersistenceError> {
        match self.read().await {
            Ok(s) => Ok(s),
            Err(e @ PersistenceError::CorruptState { .. }) => {
                tracing::warn!(error = %e, "discarding corrupt session state");
                Ok(Session::new())
            }
            Err(e) => Err(e),
        }
    }

    /// 临时文件 + rename，保证文件要么是旧内容要么是完整新内容
    async fn write(&self, session: &Session) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "session.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        let data = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self) -> Session {
        let _guard = self.lock.lock().await;
        match self.read().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "session load failed, starting empty");
                Session::new()
            }
        }
    }

    async fn append(&self, messages: &[Message]) -> Result<(), PersistenceError> {
        if messages.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut session = self.read_for_update().await?;
        session.messages.extend_from_slice(messages);
        self.write(&session).await
    }

    async fn set_criteria(&self, criteria: &str) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut session = self.read_for_update().await?;
        if session.criteria == criteria {
            return Ok(());
        }
        session.criteria = criteria.to_string();
        self.write(&session).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "session memory cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 进程内会话存储（测试与无盘运行）
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    session: Mutex<Session>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self) -> Session {
        self.session.lock().await.clone()
    }

    async fn append(&self, messages: &[Message]) -> Result<(), PersistenceError> {
        self.session.lock().await.messages.extend_from_slice(messages);
        Ok(())
    }

    async fn set_criteria(&self, criteria: &str) -> Result<(), PersistenceError> {
        self.session.lock().await.criteria = criteria.to_string();
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.session.lock().await = Session::new();
        Ok(())
    }
}

/// 多会话目录：每个会话一个 JSON 文件，同一会话 ID 的所有 store 共享一把锁
#[derive(Debug)]
pub struct SessionDirectory {
    root: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionDirectory {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// 获取会话的存储句柄；会话 ID 中的非法字符替换为 '_'，文件始终位于 root 下
    pub fn store(&self, session_id: &str) -> FileConversationStore {
        let key = sanitize_session_id(session_id);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        FileConversationStore::with_lock(self.root.join(format!("{key}.json")), lock)
    }
}

/// 会话 id → 文件名主干
///
/// 只含 `[A-Za-z0-9_-]` 的 id 原样使用；其余情况替换非法字符后附加原始 id 的 SHA-256 前缀，
/// 保证不同 id 不会落到同一文件。
fn sanitize_session_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() {
        return "default".to_string();
    }
    if cleaned == id {
        return cleaned;
    }
    let digest = Sha256::digest(id.as_bytes());
    format!("{cleaned}-{}", hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Role, VerdictKind};

    fn temp_store() -> (tempfile::TempDir, FileConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path().join("sidekick_memory.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let (_dir, store) = temp_store();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load_preserves_order() {
        let (_dir, store) = temp_store();
        store
            .append(&[Message::user("a"), Message::worker("b")])
            .await
            .unwrap();
        store
            .append(&[Message::evaluator("c", VerdictKind::Satisfied)])
            .await
            .unwrap();
        let session = store.load().await;
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(session.messages[2].verdict, Some(VerdictKind::Satisfied));
    }

    #[tokio::test]
    async fn test_clear_then_load_is_empty() {
        let (_dir, store) = temp_store();
        store.set_criteria("be brief").await.unwrap();
        store.append(&[Message::user("a")]).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_empty());
        assert!(!store.path().exists());
        // 重复清空不报错
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().await.is_empty());

        store.append(&[Message::user("fresh")]).await.unwrap();
        let session = store.load().await;
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_criteria_survives_appends() {
        let (_dir, store) = temp_store();
        store.set_criteria("exactly 3 lines").await.unwrap();
        store.append(&[Message::user("haiku")]).await.unwrap();
        let reopened = FileConversationStore::new(store.path());
        let session = reopened.load().await;
        assert_eq!(session.criteria, "exactly 3 lines");
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_session_directory_isolates_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionDirectory::new(dir.path());
        sessions.store("alice").append(&[Message::user("hi")]).await.unwrap();
        sessions.store("bob").append(&[Message::user("yo")]).await.unwrap();
        sessions.store("bob").clear().await.unwrap();

        assert_eq!(sessions.store("alice").load().await.messages.len(), 1);
        assert!(sessions.store("bob").load().await.is_empty());
    }

    #[test]
    fn test_sanitize_session_id() {
        let escaped = sanitize_session_id("../../etc/passwd");
        assert!(escaped.starts_with("______etc_passwd-"));
        assert!(!escaped.contains('/') && !escaped.contains('.'));
        assert_eq!(sanitize_session_id("user-1_a"), "user-1_a");
        assert_eq!(sanitize_session_id(""), "default");
    }

    #[test]
    fn test_sanitized_ids_do_not_collide() {
        assert_ne!(sanitize_session_id("a.b"), sanitize_session_id("a_b"));
        assert_ne!(sanitize_session_id("a.b"), sanitize_session_id("a/b"));
        assert_eq!(sanitize_session_id("a.b"), sanitize_session_id("a.b"));
    }

    #[tokio::test]
    async fn test_similar_session_ids_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionDirectory::new(dir.path());
        sessions.store("a.b").append(&[Message::user("dotted")]).await.unwrap();
        sessions.store("a_b").append(&[Message::user("underscored")]).await.unwrap();

        let dotted = sessions.store("a.b").load().await.messages;
        let underscored = sessions.store("a_b").load().await.messages;
        assert_eq!(dotted.len(), 1);
        assert_eq!(dotted[0].content, "dotted");
        assert_eq!(underscored.len(), 1);
        assert_eq!(underscored[0].content, "underscored");
    }
}
