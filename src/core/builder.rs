//! Sidekick 构建器：统一的初始化逻辑
//!
//! 从 AppConfig 构建 Worker / Evaluator 的 LLM 客户端、工具注册表、澄清判定与编排器，
//! 最终组装为前端使用的 Sidekick。测试可以通过 with_llms / with_store / with_tool 替换任意组件。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Sidekick;
use crate::config::{load_config, AppConfig};
use crate::core::{AgentError, Orchestrator, OrchestratorConfig, TaskScheduler};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use crate::memory::{ConversationStore, FileConversationStore};
use crate::react::{
    ClarificationOracle, EventSender, Evaluator, LlmOracle, MarkerOracle, Worker,
    DEFAULT_EVALUATOR_PROMPT, DEFAULT_WORKER_PROMPT,
};
#[cfg(feature = "browser")]
use crate::tools::BrowserTool;
use crate::tools::{
    ArxivTool, CalculatorTool, CopyFileTool, DeleteFileTool, FetchTool, FileSearchTool,
    ListDirectoryTool, MoveFileTool, PythonTool, ReadFileTool, SafeFs, Tool, ToolExecutor,
    ToolRegistry, WebSearchTool, WikipediaTool, WriteFileTool,
};

/// 按候选路径读取提示词文件，全部缺失时使用内置默认
fn load_prompt(file_name: &str, fallback: &str) -> String {
    [
        format!("config/prompts/{file_name}"),
        format!("../config/prompts/{file_name}"),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .filter(|s| !s.trim().is_empty())
    .unwrap_or_else(|| fallback.to_string())
}

/// Sidekick 构建器
pub struct SidekickBuilder {
    config: AppConfig,
    workspace: PathBuf,
    worker_prompt: String,
    evaluator_prompt: String,
    event_tx: Option<EventSender>,
    store: Option<Arc<dyn ConversationStore>>,
    llms: Option<(Arc<dyn LlmClient>, Arc<dyn LlmClient>)>,
    extra_tools: Vec<Arc<dyn Tool>>,
}

impl SidekickBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            worker_prompt: DEFAULT_WORKER_PROMPT.to_string(),
            evaluator_prompt: DEFAULT_EVALUATOR_PROMPT.to_string(),
            event_tx: None,
            store: None,
            llms: None,
            extra_tools: Vec::new(),
        }
    }

    /// 从 config/prompts/worker.md、evaluator.md 加载提示词
    pub fn with_prompts_from_files(mut self) -> Self {
        self.worker_prompt = load_prompt("worker.md", DEFAULT_WORKER_PROMPT);
        self.evaluator_prompt = load_prompt("evaluator.md", DEFAULT_EVALUATOR_PROMPT);
        self
    }

    pub fn with_worker_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.worker_prompt = prompt.into();
        self
    }

    pub fn with_evaluator_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.evaluator_prompt = prompt.into();
        self
    }

    /// 过程事件（迭代、工具调用、判定）推送到前端
    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 替换默认的文件存储（默认为 [app].memory_file）
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 直接指定 Worker / Evaluator 的 LLM 客户端，不再按配置创建
    pub fn with_llms(mut self, worker: Arc<dyn LlmClient>, evaluator: Arc<dyn LlmClient>) -> Self {
        self.llms = Some((worker, evaluator));
        self
    }

    /// 额外注册一个工具（同名覆盖内置工具）
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.push(Arc::new(tool));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 构建工具注册表；前置条件不满足的工具（如缺少 API Key）跳过并记录
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let timeout = tools_cfg.tool_timeout_secs;
        let max_chars = tools_cfg.max_result_chars;
        let mut tools = ToolRegistry::new();

        match SafeFs::new(&self.workspace) {
            Ok(fs) => {
                tools.register(ReadFileTool::new(fs.clone()));
                tools.register(WriteFileTool::new(fs.clone()));
                tools.register(ListDirectoryTool::new(fs.clone()));
                tools.register(CopyFileTool::new(fs.clone()));
                tools.register(MoveFileTool::new(fs.clone()));
                tools.register(DeleteFileTool::new(fs.clone()));
                tools.register(FileSearchTool::new(fs));
            }
            Err(e) => tracing::warn!(error = %e, "file tools disabled"),
        }

        match WebSearchTool::from_env(
            &tools_cfg.search.endpoint,
            &tools_cfg.search.api_key_env,
            tools_cfg.search.num_results,
            timeout,
        ) {
            Some(search) => tools.register(search),
            None => tracing::warn!(
                env = %tools_cfg.search.api_key_env,
                "search tool disabled: API key not set"
            ),
        }

        tools.register(WikipediaTool::new(
            &tools_cfg.wikipedia.language,
            tools_cfg.wikipedia.top_k,
            timeout,
            max_chars,
        ));

        match ArxivTool::new(tools_cfg.arxiv.max_results, timeout, max_chars) {
            Ok(arxiv) => tools.register(arxiv),
            Err(e) => tracing::warn!(error = %e, "arxiv tool disabled"),
        }

        tools.register(
            PythonTool::new(&tools_cfg.python.interpreter, &self.workspace, timeout, max_chars)
                .with_require_sandbox(tools_cfg.python.require_sandbox),
        );
        tools.register(CalculatorTool);
        tools.register(FetchTool::new(
            tools_cfg.fetch.allowed_domains.clone(),
            timeout,
            max_chars,
        ));

        #[cfg(feature = "browser")]
        tools.register(BrowserTool::new(
            tools_cfg.browser.allowed_domains.clone(),
            max_chars,
        ));

        for tool in &self.extra_tools {
            tools.register_arc(tool.clone());
        }

        tracing::info!(tools = ?tools.tool_names(), "tool registry built");
        tools
    }

    /// 按 [llm] 段构建单个模型客户端，外层包一层重试
    pub fn build_llm(&self, model: &str) -> Arc<dyn LlmClient> {
        let llm_cfg = &self.config.llm;
        let inner: Arc<dyn LlmClient> = match llm_cfg.provider.as_str() {
            "mock" => Arc::new(MockLlmClient),
            _ => Arc::new(OpenAiClient::new(
                llm_cfg.base_url.as_deref(),
                model,
                None,
                Duration::from_secs(llm_cfg.request_timeout_secs),
            )),
        };
        Arc::new(RetryingLlmClient::new(
            inner,
            RetryConfig {
                max_retries: llm_cfg.max_retries,
                initial_backoff: Duration::from_millis(llm_cfg.retry_backoff_ms),
            },
        ))
    }

    pub fn build_oracle(&self, llm: Arc<dyn LlmClient>) -> Arc<dyn ClarificationOracle> {
        match self.config.orchestrator.oracle.as_str() {
            "llm" => Arc::new(LlmOracle::new(llm)),
            _ => Arc::new(MarkerOracle::new()),
        }
    }

    /// 组装 Sidekick
    pub fn build(self) -> Sidekick {
        let (worker_llm, evaluator_llm) = match &self.llms {
            Some((w, e)) => (w.clone(), e.clone()),
            None => (
                self.build_llm(&self.config.llm.worker_model),
                self.build_llm(&self.config.llm.evaluator_model),
            ),
        };
        let oracle = self.build_oracle(evaluator_llm.clone());

        let registry = Arc::new(self.build_tool_registry());
        let scheduler = Arc::new(TaskScheduler::new(self.config.tools.max_concurrent));
        let executor = Arc::new(
            ToolExecutor::new(registry.clone(), self.config.tools.tool_timeout_secs)
                .with_scheduler(scheduler)
                .with_max_result_chars(self.config.tools.max_result_chars),
        );

        let mut worker = Worker::new(worker_llm, executor, oracle.clone())
            .with_base_prompt(self.worker_prompt.clone())
            .with_max_tool_rounds(self.config.orchestrator.max_tool_rounds);
        if let Some(tx) = &self.event_tx {
            worker = worker.with_event_tx(tx.clone());
        }
        let evaluator = Evaluator::new(evaluator_llm, oracle).with_system_prompt(self.evaluator_prompt.clone());

        let mut orchestrator = Orchestrator::new(
            Arc::new(worker),
            Arc::new(evaluator),
            OrchestratorConfig {
                max_iterations: self.config.orchestrator.max_iterations,
                max_run_time: self.config.orchestrator.max_run_time(),
            },
        );
        if let Some(tx) = &self.event_tx {
            orchestrator = orchestrator.with_event_tx(tx.clone());
        }

        let store: Arc<dyn ConversationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileConversationStore::new(&self.config.app.memory_file)),
        };

        Sidekick::new(orchestrator, store, registry, self.event_tx)
    }
}

/// 加载配置（失败时退回默认并告警）、校验、创建沙箱目录，返回构建器
pub fn create_sidekick_builder(config_path: Option<PathBuf>) -> Result<SidekickBuilder, AgentError> {
    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    config.validate()?;

    let workspace = config.app.workspace_root.clone();
    std::fs::create_dir_all(&workspace).map_err(|e| {
        AgentError::Config(format!("cannot create workspace {}: {e}", workspace.display()))
    })?;

    Ok(SidekickBuilder::new(config, workspace).with_prompts_from_files())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(dir: &Path) -> SidekickBuilder {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.tools.search.api_key_env = "SIDEKICK_TEST_UNSET_SEARCH_KEY".into();
        SidekickBuilder::new(config, dir.to_path_buf())
    }

    #[test]
    fn test_registry_skips_search_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builder(dir.path()).build_tool_registry();
        let names = registry.tool_names();
        assert!(!names.contains(&"search".to_string()));
        for expected in [
            "read_file",
            "write_file",
            "list_directory",
            "copy_file",
            "move_file",
            "delete_file",
            "file_search",
            "wikipedia",
            "arxiv",
            "python",
            "calculator",
            "fetch",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_extra_tool_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builder(dir.path())
            .with_tool(CalculatorTool)
            .build_tool_registry();
        assert!(registry.get("calculator").is_some());
    }

    #[tokio::test]
    async fn test_mock_llm_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let llm = builder(dir.path()).build_llm("gpt-4o-mini");
        let reply = llm
            .complete(&[crate::llm::PromptMessage::user("ping")])
            .await
            .unwrap();
        assert_eq!(reply, "Mock reply: ping");
    }
}
