//! 网页搜索工具（Serper Google Search API）
//!
//! POST {endpoint}，请求头 X-API-KEY，body {"q", "num"}；
//! 依次格式化 answerBox、knowledgeGraph 与 organic 结果。API Key 缺失时不注册该工具。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::fetch::http_client;
use crate::tools::{SideEffects, Tool};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

fn format_results(resp: &SerperResponse) -> String {
    let mut sections = Vec::new();
    if let Some(ab) = &resp.answer_box {
        if let Some(text) = ab.answer.as_deref().or(ab.snippet.as_deref()) {
            sections.push(format!("Answer: {text}"));
        }
    }
    if let Some(kg) = &resp.knowledge_graph {
        match (&kg.title, &kg.description) {
            (Some(t), Some(d)) => sections.push(format!("{t}: {d}")),
            (Some(t), None) => sections.push(t.clone()),
            (None, Some(d)) => sections.push(d.clone()),
            (None, None) => {}
        }
    }
    for r in &resp.organic {
        sections.push(format!("{}\n{}\n{}", r.title, r.link, r.snippet));
    }
    if sections.is_empty() {
        "No good search result found.".to_string()
    } else {
        sections.join("\n\n")
    }
}

/// 搜索工具
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    num_results: u32,
}

impl WebSearchTool {
    pub fn new(endpoint: &str, api_key: String, num_results: u32, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            endpoint: endpoint.to_string(),
            api_key,
            num_results: num_results.max(1),
        }
    }

    /// 从环境变量读取 API Key；缺失或为空返回 None
    pub fn from_env(
        endpoint: &str,
        api_key_env: &str,
        num_results: u32,
        timeout_secs: u64,
    ) -> Option<Self> {
        let key = std::env::var(api_key_env).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some(Self::new(endpoint, key, num_results, timeout_secs))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Run an online web search and return the top results. Args: {\"query\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string", "minLength": 1 } },
            "required": ["query"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::NETWORK
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args["query"].as_str().unwrap_or("").trim();
        tracing::info!(query = %query, "search tool execute");
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": self.num_results }))
            .send()
            .await
            .map_err(|e| format!("Search request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("Search API returned HTTP {}", resp.status()));
        }
        let parsed: SerperResponse = resp
            .json()
            .await
            .map_err(|e| format!("Search response unreadable: {e}"))?;
        Ok(format_results(&parsed))
    }
}
