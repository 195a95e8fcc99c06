//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SIDEKICK__*` 覆盖（双下划线表示嵌套，如 `SIDEKICK__LLM__PROVIDER=mock`）。
//! 兼容旧变量：`OPENAI_CHAT_MODEL_WORKER`、`OPENAI_CHAT_MODEL_EVALUATOR`、`MEMORY_FILE`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
}

/// [app] 段：名称、会话文件、沙箱目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话持久化文件；删除该文件等价于 clear
    #[serde(default = "default_memory_file")]
    pub memory_file: PathBuf,
    /// 文件 / Python 工具的沙箱根目录
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            memory_file: default_memory_file(),
            workspace_root: default_workspace_root(),
        }
    }
}

fn default_memory_file() -> PathBuf {
    PathBuf::from("sidekick_memory.json")
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("sandbox")
}

/// [llm] 段：后端、Worker / Evaluator 模型、重试与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub worker_model: String,
    #[serde(default = "default_model")]
    pub evaluator_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            worker_model: default_model(),
            evaluator_model: default_model(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：迭代上限、时间预算、工具轮数、澄清判定方式
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_run_secs")]
    pub max_run_secs: u64,
    /// 单个 Worker 步骤内最多的工具调用轮数
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// marker / llm
    #[serde(default = "default_oracle")]
    pub oracle: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_run_secs: default_max_run_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            oracle: default_oracle(),
        }
    }
}

impl OrchestratorSection {
    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_run_secs() -> u64 {
    300
}

fn default_max_tool_rounds() -> u32 {
    8
}

fn default_oracle() -> String {
    "marker".to_string()
}

/// [tools] 段：超时、并发、输出截断与各工具子段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 同一轮内并发执行的工具数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub wikipedia: WikipediaSection,
    #[serde(default)]
    pub arxiv: ArxivSection,
    #[serde(default)]
    pub python: PythonSection,
    #[serde(default)]
    pub fetch: DomainSection,
    #[serde(default)]
    pub browser: DomainSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            max_result_chars: default_max_result_chars(),
            search: SearchSection::default(),
            wikipedia: WikipediaSection::default(),
            arxiv: ArxivSection::default(),
            python: PythonSection::default(),
            fetch: DomainSection::default(),
            browser: DomainSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_result_chars() -> usize {
    8000
}

/// [tools.search] 段：Serper 接口
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    /// 存放 API Key 的环境变量名；变量缺失时不注册 search
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_num_results")]
    pub num_results: u32,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            num_results: default_num_results(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".to_string()
}

fn default_search_key_env() -> String {
    "SERPER_API_KEY".to_string()
}

fn default_num_results() -> u32 {
    5
}

/// [tools.wikipedia] 段
#[derive(Debug, Clone, Deserialize)]
pub struct WikipediaSection {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for WikipediaSection {
    fn default() -> Self {
        Self {
            language: default_language(),
            top_k: default_top_k(),
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_top_k() -> usize {
    3
}

/// [tools.arxiv] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ArxivSection {
    #[serde(default = "default_arxiv_results")]
    pub max_results: u32,
}

impl Default for ArxivSection {
    fn default() -> Self {
        Self {
            max_results: default_arxiv_results(),
        }
    }
}

fn default_arxiv_results() -> u32 {
    3
}

/// [tools.python] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PythonSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// 无法启用文件系统隔离时拒绝执行
    #[serde(default = "default_true")]
    pub require_sandbox: bool,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            require_sandbox: true,
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

/// [tools.fetch] / [tools.browser] 段：域名白名单，空表示不限制
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DomainSection {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl AppConfig {
    /// 拒绝会让编排无法进行的取值
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(AgentError::Config("orchestrator.max_iterations must be at least 1".into()));
        }
        if self.orchestrator.max_run_secs == 0 {
            return Err(AgentError::Config("orchestrator.max_run_secs must be at least 1".into()));
        }
        if self.tools.tool_timeout_secs == 0 {
            return Err(AgentError::Config("tools.tool_timeout_secs must be at least 1".into()));
        }
        match self.llm.provider.as_str() {
            "openai" | "mock" => {}
            other => return Err(AgentError::Config(format!("unknown llm.provider: {other}"))),
        }
        match self.orchestrator.oracle.as_str() {
            "marker" | "llm" => Ok(()),
            other => Err(AgentError::Config(format!("unknown orchestrator.oracle: {other}"))),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SIDEKICK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 SIDEKICK__*（双下划线表示嵌套键）
/// 4. 最后应用旧版环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SIDEKICK")
            .separator("__")
            .try_parsing(true),
    );

    let legacy = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    builder = builder
        .set_override_option("llm.worker_model", legacy("OPENAI_CHAT_MODEL_WORKER"))?
        .set_override_option("llm.evaluator_model", legacy("OPENAI_CHAT_MODEL_EVALUATOR"))?
        .set_override_option("app.memory_file", legacy("MEMORY_FILE"))?;

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.memory_file, PathBuf::from("sidekick_memory.json"));
        assert_eq!(cfg.app.workspace_root, PathBuf::from("sandbox"));
        assert_eq!(cfg.llm.worker_model, "gpt-4o-mini");
        assert_eq!(cfg.llm.evaluator_model, "gpt-4o-mini");
        assert_eq!(cfg.orchestrator.max_iterations, 3);
        assert_eq!(cfg.tools.search.api_key_env, "SERPER_API_KEY");
        assert!(cfg.tools.fetch.allowed_domains.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[orchestrator]\nmax_iterations = 5\n\n[tools.wikipedia]\nlanguage = \"de\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.orchestrator.max_iterations, 5);
        assert_eq!(cfg.orchestrator.max_run_secs, 300);
        assert_eq!(cfg.tools.wikipedia.language, "de");
        assert_eq!(cfg.tools.wikipedia.top_k, 3);
        assert_eq!(cfg.llm.provider, "openai");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.max_iterations = 0;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));

        let mut cfg = AppConfig::default();
        cfg.orchestrator.max_run_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.orchestrator.oracle = "guess".into();
        assert!(cfg.validate().is_err());
    }
}
