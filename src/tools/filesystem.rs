//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录（默认 sandbox），读路径经 canonicalize 校验必须在根下。
//! 写路径拒绝绝对路径与 `..`；最深的已存在祖先（含目标自身）解析符号链接后必须仍在根下，
//! 通过校验后才创建缺失目录；打开文件时不跟随末端符号链接。
//! read_file / write_file / list_directory / copy_file / move_file / delete_file / file_search
//! 均基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use walkdir::WalkDir;

use crate::tools::{SideEffects, Tool};

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Path escapes the workspace: {0}")]
    PathEscape(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Invalid pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 沙箱文件系统：绑定根目录，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    /// 根目录不存在时创建
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| SandboxError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let root_dir = root.canonicalize().unwrap_or(root);
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径，必须位于根目录下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = path.trim().trim_start_matches("./");
        let full = self.root_dir.join(rel);
        let canonical = full
            .canonicalize()
            .map_err(|_| SandboxError::NotFound(path.to_string()))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(SandboxError::PathEscape(path.to_string())) // 如 ../../etc/passwd 或指向外部的符号链接
        }
    }

    /// 解析待写入的路径（文件可以不存在）
    ///
    /// 目标已存在时返回其 canonical 路径；不存在时只在校验通过后创建父目录。
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = Path::new(path.trim());
        if rel.as_os_str().is_empty() {
            return Err(SandboxError::NotFound(path.to_string()));
        }
        let lexically_safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !lexically_safe {
            return Err(SandboxError::PathEscape(path.to_string()));
        }
        let full = self.root_dir.join(rel);

        let mut existing = full.as_path();
        while std::fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        // 悬空链接无法 canonicalize，同样拒绝
        let anchor = existing
            .canonicalize()
            .map_err(|_| SandboxError::PathEscape(path.to_string()))?;
        if !anchor.starts_with(&self.root_dir) {
            return Err(SandboxError::PathEscape(path.to_string()));
        }
        if existing == full.as_path() {
            return Ok(anchor);
        }

        let rest = full
            .strip_prefix(existing)
            .map_err(|_| SandboxError::PathEscape(path.to_string()))?;
        let target = anchor.join(rest);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                path: path.to_string(),
                source,
            })?;
        }
        Ok(target)
    }

    /// 解析已存在的普通文件
    fn resolve_file(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve(path)?;
        if resolved.is_file() {
            Ok(resolved)
        } else {
            Err(SandboxError::NotAFile(path.to_string()))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|source| SandboxError::Io {
            path: path.to_string(),
            source,
        })
    }

    pub fn write_file(&self, path: &str, text: &str, append: bool) -> Result<usize, SandboxError> {
        use std::io::Write;

        let resolved = self.resolve_for_write(path)?;
        let io_err = |source| SandboxError::Io {
            path: path.to_string(),
            source,
        };
        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).append(append).truncate(!append);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOFOLLOW);
        }
        let mut file = options.open(&resolved).map_err(io_err)?;
        file.write_all(text.as_bytes()).map_err(io_err)?;
        Ok(text.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, SandboxError> {
        let base = if path.trim().is_empty() || path.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let io_err = |source| SandboxError::Io {
            path: path.to_string(),
            source,
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(io_err)? {
            let e = e.map_err(io_err)?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// 复制文件，两端都必须在根下；返回复制的字节数
    pub fn copy_file(&self, source: &str, destination: &str) -> Result<u64, SandboxError> {
        let from = self.resolve_file(source)?;
        let to = self.resolve_for_write(destination)?;
        std::fs::copy(&from, &to).map_err(|source_err| SandboxError::Io {
            path: destination.to_string(),
            source: source_err,
        })
    }

    /// 移动（重命名）文件，两端都必须在根下
    pub fn move_file(&self, source: &str, destination: &str) -> Result<(), SandboxError> {
        let from = self.resolve_file(source)?;
        let to = self.resolve_for_write(destination)?;
        std::fs::rename(&from, &to).map_err(|source_err| SandboxError::Io {
            path: destination.to_string(),
            source: source_err,
        })
    }

    /// 删除文件；不删除目录
    pub fn delete_file(&self, path: &str) -> Result<(), SandboxError> {
        let resolved = self.resolve_file(path)?;
        std::fs::remove_file(&resolved).map_err(|source| SandboxError::Io {
            path: path.to_string(),
            source,
        })
    }

    /// 在目录下递归查找文件名匹配 glob 模式的文件，返回相对根目录的路径
    pub fn search(&self, dir: &str, pattern: &str, limit: usize) -> Result<Vec<String>, SandboxError> {
        let base = if dir.trim().is_empty() || dir.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(dir)?
        };
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| SandboxError::InvalidPattern(pattern.to_string(), e.to_string()))?;

        // WalkDir 默认不跟随符号链接，遍历不会离开根目录
        let mut found = Vec::new();
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if found.len() >= limit {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !matcher.matches(&name) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root_dir) {
                found.push(rel.display().to_string());
            }
        }
        found.sort();
        Ok(found)
    }
}

/// 读取工作区内的文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace. Args: {\"file_path\": \"path relative to workspace\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["file_path"].as_str().unwrap_or("");
        tracing::info!(path = %path, "read_file tool execute");
        self.fs.read_file(path).map_err(|e| e.to_string())
    }
}

/// 写入（或追加）工作区内的文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace, creating parent directories. Args: {\"file_path\": \"...\", \"text\": \"...\", \"append\": false}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "text": { "type": "string" },
                "append": { "type": "boolean" }
            },
            "required": ["file_path", "text"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["file_path"].as_str().unwrap_or("");
        let text = args["text"].as_str().unwrap_or("");
        let append = args["append"].as_bool().unwrap_or(false);
        tracing::info!(path = %path, append, "write_file tool execute");
        let bytes = self
            .fs
            .write_file(path, text, append)
            .map_err(|e| e.to_string())?;
        Ok(format!("Wrote {bytes} bytes to {path}"))
    }
}

/// 列出工作区目录
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory in the workspace. Args: {\"dir_path\": \"directory path, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "dir_path": { "type": "string" } }
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["dir_path"].as_str().unwrap_or(".");
        tracing::info!(path = %path, "list_directory tool execute");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

/// 复制工作区内的文件
pub struct CopyFileTool {
    fs: SafeFs,
}

impl CopyFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for CopyFileTool {
    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy a file within the workspace. Args: {\"source_path\": \"...\", \"destination_path\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source_path": { "type": "string" },
                "destination_path": { "type": "string" }
            },
            "required": ["source_path", "destination_path"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let source = args["source_path"].as_str().unwrap_or("");
        let destination = args["destination_path"].as_str().unwrap_or("");
        tracing::info!(source = %source, destination = %destination, "copy_file tool execute");
        let bytes = self
            .fs
            .copy_file(source, destination)
            .map_err(|e| e.to_string())?;
        Ok(format!("Copied {source} to {destination} ({bytes} bytes)"))
    }
}

/// 移动或重命名工作区内的文件
pub struct MoveFileTool {
    fs: SafeFs,
}

impl MoveFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move or rename a file within the workspace. Args: {\"source_path\": \"...\", \"destination_path\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source_path": { "type": "string" },
                "destination_path": { "type": "string" }
            },
            "required": ["source_path", "destination_path"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let source = args["source_path"].as_str().unwrap_or("");
        let destination = args["destination_path"].as_str().unwrap_or("");
        tracing::info!(source = %source, destination = %destination, "move_file tool execute");
        self.fs
            .move_file(source, destination)
            .map_err(|e| e.to_string())?;
        Ok(format!("Moved {source} to {destination}"))
    }
}

/// 删除工作区内的文件
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file in the workspace. Args: {\"file_path\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args["file_path"].as_str().unwrap_or("");
        tracing::info!(path = %path, "delete_file tool execute");
        self.fs.delete_file(path).map_err(|e| e.to_string())?;
        Ok(format!("Deleted {path}"))
    }
}

/// 按文件名 glob 模式递归搜索
pub struct FileSearchTool {
    fs: SafeFs,
    max_results: usize,
}

impl FileSearchTool {
    pub fn new(fs: SafeFs) -> Self {
        Self {
            fs,
            max_results: 100,
        }
    }
}

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Recursively search the workspace for files whose name matches a glob pattern. Args: {\"pattern\": \"*.md\", \"dir_path\": \"directory, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "minLength": 1 },
                "dir_path": { "type": "string" }
            },
            "required": ["pattern"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::FILESYSTEM
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let dir = args["dir_path"].as_str().unwrap_or(".");
        let pattern = args["pattern"].as_str().unwrap_or("*");
        tracing::info!(dir = %dir, pattern = %pattern, "file_search tool execute");
        let found = self
            .fs
            .search(dir, pattern, self.max_results)
            .map_err(|e| e.to_string())?;
        if found.is_empty() {
            Ok(format!("No files found for pattern {pattern}"))
        } else {
            Ok(found.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, SafeFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path().join("sandbox")).unwrap();
        (dir, fs)
    }

    #[test]
    fn test_write_read_list() {
        let (_dir, fs) = sandbox();
        fs.write_file("notes/a.txt", "hello", false).unwrap();
        fs.write_file("notes/a.txt", " world", true).unwrap();
        assert_eq!(fs.read_file("notes/a.txt").unwrap(), "hello world");
        assert_eq!(fs.list_dir(".").unwrap(), vec!["notes/"]);
        assert_eq!(fs.list_dir("notes").unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn test_rejects_escape() {
        let (dir, fs) = sandbox();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        assert!(matches!(
            fs.read_file("../secret.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.write_file("../evil.txt", "x", false),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.write_file("/etc/evil.txt", "x", false),
            Err(SandboxError::PathEscape(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let (_dir, fs) = sandbox();
        assert!(matches!(fs.read_file("nope.txt"), Err(SandboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_tool_reports_bytes() {
        let (_dir, fs) = sandbox();
        let tool = WriteFileTool::new(fs.clone());
        let out = tool
            .execute(serde_json::json!({"file_path": "out.md", "text": "abc"}))
            .await
            .unwrap();
        assert_eq!(out, "Wrote 3 bytes to out.md");
        let listing = ListDirectoryTool::new(fs)
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(listing, "out.md");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_does_not_follow_symlink_out_of_root() {
        let (dir, fs) = sandbox();
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, "original").unwrap();
        std::os::unix::fs::symlink(&victim, fs.root().join("link.txt")).unwrap();

        assert!(matches!(
            fs.write_file("link.txt", "overwritten", false),
            Err(SandboxError::PathEscape(_))
        ));
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "original");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_does_not_create_outside() {
        let (dir, fs) = sandbox();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, fs.root().join("out")).unwrap();

        assert!(matches!(
            fs.write_file("out/deep/new.txt", "x", false),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(!outside.join("deep").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_writes_target() {
        let (_dir, fs) = sandbox();
        fs.write_file("real.txt", "a", false).unwrap();
        std::os::unix::fs::symlink(fs.root().join("real.txt"), fs.root().join("alias.txt")).unwrap();
        fs.write_file("alias.txt", "b", false).unwrap();
        assert_eq!(fs.read_file("real.txt").unwrap(), "b");
    }

    #[tokio::test]
    async fn test_copy_move_delete() {
        let (_dir, fs) = sandbox();
        fs.write_file("a.txt", "hello", false).unwrap();

        let out = CopyFileTool::new(fs.clone())
            .execute(serde_json::json!({"source_path": "a.txt", "destination_path": "backup/a.txt"}))
            .await
            .unwrap();
        assert_eq!(out, "Copied a.txt to backup/a.txt (5 bytes)");
        assert_eq!(fs.read_file("backup/a.txt").unwrap(), "hello");

        MoveFileTool::new(fs.clone())
            .execute(serde_json::json!({"source_path": "a.txt", "destination_path": "b.txt"}))
            .await
            .unwrap();
        assert!(matches!(fs.read_file("a.txt"), Err(SandboxError::NotFound(_))));
        assert_eq!(fs.read_file("b.txt").unwrap(), "hello");

        DeleteFileTool::new(fs.clone())
            .execute(serde_json::json!({"file_path": "b.txt"}))
            .await
            .unwrap();
        assert!(matches!(fs.read_file("b.txt"), Err(SandboxError::NotFound(_))));
        assert!(matches!(fs.delete_file("backup"), Err(SandboxError::NotAFile(_))));
    }

    #[test]
    fn test_copy_move_delete_reject_escape() {
        let (dir, fs) = sandbox();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "x").unwrap();
        fs.write_file("in.txt", "y", false).unwrap();

        assert!(matches!(
            fs.copy_file("../secret.txt", "stolen.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.copy_file("in.txt", "../copied.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.move_file("in.txt", "../moved.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.move_file("../secret.txt", "here.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.delete_file("../secret.txt"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(secret.exists());
        assert!(!dir.path().join("copied.txt").exists());
        assert!(!dir.path().join("moved.txt").exists());
        assert_eq!(fs.read_file("in.txt").unwrap(), "y");
    }

    #[tokio::test]
    async fn test_file_search() {
        let (dir, fs) = sandbox();
        fs.write_file("notes/a.md", "", false).unwrap();
        fs.write_file("notes/deep/b.md", "", false).unwrap();
        fs.write_file("c.txt", "", false).unwrap();
        std::fs::write(dir.path().join("outside.md"), "").unwrap();

        let tool = FileSearchTool::new(fs.clone());
        let out = tool
            .execute(serde_json::json!({"pattern": "*.md"}))
            .await
            .unwrap();
        assert_eq!(out, "notes/a.md\nnotes/deep/b.md");

        let out = tool
            .execute(serde_json::json!({"pattern": "*.md", "dir_path": "notes/deep"}))
            .await
            .unwrap();
        assert_eq!(out, "notes/deep/b.md");

        let out = tool
            .execute(serde_json::json!({"pattern": "*.pdf"}))
            .await
            .unwrap();
        assert_eq!(out, "No files found for pattern *.pdf");

        assert!(matches!(
            fs.search("..", "*.md", 10),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            fs.search(".", "[", 10),
            Err(SandboxError::InvalidPattern(..))
        ));
    }
}
