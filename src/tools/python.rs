//! Python 执行工具
//!
//! 以隔离模式（-I）运行一段 Python 代码，工作目录为工作区根；清空环境变量，只保留固定 PATH 与 HOME。
//! 只有 print() 的输出会返回给模型；非零退出码时返回 stderr。
//!
//! Linux 上子进程在 exec 前通过 Landlock 限制文件访问：工作区可读写，解释器安装目录只读，
//! 其余路径（含 /etc、/home、工作区之外的临时目录）一律拒绝。内核不支持 Landlock 时，
//! `require_sandbox = true`（默认）拒绝执行，否则记录告警后不加限制地运行。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::{SideEffects, Tool};

const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// 解释器运行所需的只读目录
const READ_ONLY_DIRS: &[&str] = &[
    "/usr",
    "/lib",
    "/lib64",
    "/bin",
    "/etc/ld.so.cache",
    "/etc/localtime",
    "/dev/null",
    "/dev/urandom",
];

pub struct PythonTool {
    interpreter: String,
    workdir: PathBuf,
    timeout_secs: u64,
    max_output_chars: usize,
    require_sandbox: bool,
}

impl PythonTool {
    pub fn new(
        interpreter: &str,
        workdir: impl Into<PathBuf>,
        timeout_secs: u64,
        max_output_chars: usize,
    ) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            workdir: workdir.into(),
            timeout_secs: timeout_secs.max(1),
            max_output_chars: max_output_chars.max(1),
            require_sandbox: true,
        }
    }

    /// 内核不支持 Landlock 时是否拒绝执行
    pub fn with_require_sandbox(mut self, require: bool) -> Self {
        self.require_sandbox = require;
        self
    }

    /// 解释器的安装前缀（如 /opt/python/bin/python3 → /opt/python），用于只读授权
    fn interpreter_prefix(&self) -> Option<PathBuf> {
        let path = Path::new(&self.interpreter);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            SAFE_PATH
                .split(':')
                .map(|dir| Path::new(dir).join(path))
                .find(|p| p.is_file())?
        };
        let resolved = resolved.canonicalize().ok()?;
        resolved.parent()?.parent().map(Path::to_path_buf)
    }

    fn clip(&self, s: &str) -> String {
        if s.chars().count() > self.max_output_chars {
            s.chars().take(self.max_output_chars).collect::<String>() + "\n...[truncated]"
        } else {
            s.to_string()
        }
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Execute Python code in the workspace directory. Only output written with print() is returned. Args: {\"code\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source; use print() to produce output"
                }
            },
            "required": ["code"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects {
            code_execution: true,
            filesystem: true,
            ..SideEffects::NONE
        }
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let code = args["code"].as_str().unwrap_or("");
        if code.trim().is_empty() {
            return Err("Empty code".to_string());
        }
        tracing::info!(chars = code.len(), "python tool execute");

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-I", "-c", code])
            .current_dir(&self.workdir)
            .env_clear()
            .env("PATH", SAFE_PATH)
            .env("HOME", &self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut read_only: Vec<PathBuf> = READ_ONLY_DIRS.iter().map(PathBuf::from).collect();
        read_only.extend(self.interpreter_prefix());
        sandbox::confine(&mut cmd, &self.workdir, &read_only, self.require_sandbox)?;

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Python timed out after {}s", self.timeout_secs))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::Unsupported => {
                    "Python sandbox unavailable: kernel does not support Landlock".to_string()
                }
                _ => format!("Failed to start {}: {e}", self.interpreter),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(self.clip(&format!("exit {code}: {}", stderr.trim())));
        }
        if stdout.trim().is_empty() {
            return Ok("(no output; use print() to return values)".to_string());
        }
        Ok(self.clip(stdout.trim_end()))
    }
}

#[cfg(target_os = "linux")]
mod sandbox {
    use std::path::{Path, PathBuf};

    use landlock::{
        path_beneath_rules, Access, AccessFs, Ruleset, RulesetAttr, RulesetCreatedAttr,
        RulesetStatus, ABI,
    };
    use tokio::process::Command;

    /// 在父进程中建好规则集，子进程 exec 前只做 restrict_self
    pub fn confine(
        cmd: &mut Command,
        workdir: &Path,
        read_only: &[PathBuf],
        require: bool,
    ) -> Result<(), String> {
        let abi = ABI::V2;
        let ruleset = Ruleset::default()
            .handle_access(AccessFs::from_all(abi))
            .and_then(|r| r.create())
            .and_then(|r| r.add_rules(path_beneath_rules(read_only, AccessFs::from_read(abi))))
            .and_then(|r| r.add_rules(path_beneath_rules([workdir], AccessFs::from_all(abi))))
            .map_err(|e| format!("Failed to prepare python sandbox: {e}"))?;

        let mut ruleset = Some(ruleset);
        // SAFETY: 闭包在 fork 之后、exec 之前运行，只调用 prctl 与 landlock 系统调用；
        // 失败时返回 ENOSYS，父进程据此识别为 Unsupported
        unsafe {
            cmd.pre_exec(move || {
                let Some(ruleset) = ruleset.take() else {
                    return Ok(());
                };
                let enforced = match ruleset.restrict_self() {
                    Ok(status) => !matches!(status.ruleset, RulesetStatus::NotEnforced),
                    Err(_) => false,
                };
                if require && !enforced {
                    return Err(std::io::Error::from_raw_os_error(libc::ENOSYS));
                }
                Ok(())
            });
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod sandbox {
    use std::path::{Path, PathBuf};

    use tokio::process::Command;

    pub fn confine(
        _cmd: &mut Command,
        _workdir: &Path,
        _read_only: &[PathBuf],
        require: bool,
    ) -> Result<(), String> {
        if require {
            return Err("Python sandbox unavailable: Landlock requires Linux".to_string());
        }
        tracing::warn!("python tool running without filesystem confinement");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// python3 不存在或内核不支持 Landlock 时返回 None
    async fn run(tool: &PythonTool, code: &str) -> Option<Result<String, String>> {
        let result = tool.execute(serde_json::json!({ "code": code })).await;
        match &result {
            Err(e) if e.starts_with("Failed to start") || e.contains("sandbox unavailable") => {
                eprintln!("skipping: {e}");
                None
            }
            _ => Some(result),
        }
    }

    #[tokio::test]
    async fn test_print_output_returned() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PythonTool::new("python3", dir.path(), 10, 1000);
        let Some(result) = run(&tool, "print(6 * 7)").await else {
            return;
        };
        assert_eq!(result.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_workspace_writable() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PythonTool::new("python3", dir.path(), 10, 1000);
        let code = "open('notes.txt', 'w').write('hi')\nprint(open('notes.txt').read())";
        let Some(result) = run(&tool, code).await else {
            return;
        };
        assert_eq!(result.unwrap(), "hi");
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_cannot_write_outside_workspace() {
        let root = tempfile::tempdir().unwrap();
        let workspace = root.path().join("sandbox");
        std::fs::create_dir(&workspace).unwrap();
        let outside = root.path().join("escaped.txt");

        let tool = PythonTool::new("python3", &workspace, 10, 1000);
        let code = format!("open({:?}, 'w').write('pwned')\nprint('written')", outside.display().to_string());
        let Some(result) = run(&tool, &code).await else {
            return;
        };
        assert!(result.unwrap_err().contains("PermissionError"));
        assert!(!outside.exists());
    }

    #[tokio::test]
    async fn test_cannot_read_host_files() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PythonTool::new("python3", dir.path(), 10, 1000);
        let Some(result) = run(&tool, "print(open('/etc/hostname').read())").await else {
            return;
        };
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PythonTool::new("python3", dir.path(), 10, 1000);
        let err = tool.execute(serde_json::json!({ "code": "  " })).await.unwrap_err();
        assert_eq!(err, "Empty code");
    }
}
