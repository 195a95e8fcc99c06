//! Wikipedia 查询工具
//!
//! 先用 MediaWiki search API 找到最相关的若干页面，再取 REST summary 作为摘要。

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::fetch::http_client;
use crate::tools::{SideEffects, Tool};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
}

pub struct WikipediaTool {
    client: Client,
    language: String,
    top_k: usize,
    max_chars: usize,
}

impl WikipediaTool {
    pub fn new(language: &str, top_k: usize, timeout_secs: u64, max_chars: usize) -> Self {
        Self {
            client: http_client(timeout_secs),
            language: language.to_string(),
            top_k: top_k.max(1),
            max_chars: max_chars.max(1),
        }
    }

    fn base(&self) -> String {
        format!("https://{}.wikipedia.org", self.language)
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>, String> {
        let mut url = Url::parse(&format!("{}/w/api.php", self.base())).map_err(|e| e.to_string())?;
        url.query_pairs_mut()
            .append_pair("action", "query")
            .append_pair("list", "search")
            .append_pair("srsearch", query)
            .append_pair("srlimit", &self.top_k.to_string())
            .append_pair("format", "json");
        let resp: SearchResponse = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Wikipedia request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("Wikipedia response unreadable: {e}"))?;
        Ok(resp
            .query
            .map(|q| q.search.into_iter().map(|h| h.title).collect())
            .unwrap_or_default())
    }

    async fn summary(&self, title: &str) -> Result<Summary, String> {
        let mut url = Url::parse(&self.base()).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| "invalid wikipedia base url".to_string())?
            .extend(["api", "rest_v1", "page", "summary", title]);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Wikipedia request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| format!("Wikipedia summary unreadable: {e}"))
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Look up a topic on Wikipedia and return page summaries. Args: {\"query\": \"...\"}"
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
        tracing::info!(query = %query, "wikipedia tool execute");
        let titles = self.search_titles(query).await?;
        let mut pages = Vec::new();
        for title in titles {
            match self.summary(&title).await {
                Ok(s) => pages.push(format!("Page: {}\nSummary: {}", s.title, s.extract)),
                Err(e) => tracing::debug!(title = %title, error = %e, "wikipedia summary skipped"),
            }
        }
        if pages.is_empty() {
            return Ok("No good Wikipedia Search Result was found".to_string());
        }
        let text = pages.join("\n\n");
        Ok(text.chars().take(self.max_chars).collect())
    }
}
