//! arXiv 论文检索工具
//!
//! 调用 export.arxiv.org Atom API，用正则提取每个 entry 的发布日期、标题、作者与摘要。

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::tools::fetch::http_client;
use crate::tools::{SideEffects, Tool};

const ARXIV_API: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Clone, PartialEq)]
struct Paper {
    published: String,
    title: String,
    authors: Vec<String>,
    summary: String,
}

struct AtomPatterns {
    entry: Regex,
    published: Regex,
    title: Regex,
    author: Regex,
    summary: Regex,
}

impl AtomPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            entry: Regex::new(r"(?s)<entry>(.*?)</entry>")?,
            published: Regex::new(r"(?s)<published>(.*?)</published>")?,
            title: Regex::new(r"(?s)<title>(.*?)</title>")?,
            author: Regex::new(r"(?s)<author>\s*<name>(.*?)</name>")?,
            summary: Regex::new(r"(?s)<summary>(.*?)</summary>")?,
        })
    }

    fn parse(&self, xml: &str) -> Vec<Paper> {
        let capture = |re: &Regex, text: &str| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .unwrap_or_default()
        };
        self.entry
            .captures_iter(xml)
            .filter_map(|c| c.get(1))
            .map(|entry| {
                let entry = entry.as_str();
                Paper {
                    published: capture(&self.published, entry)
                        .chars()
                        .take(10)
                        .collect(),
                    title: capture(&self.title, entry),
                    authors: self
                        .author
                        .captures_iter(entry)
                        .filter_map(|c| c.get(1))
                        .map(|m| collapse_whitespace(m.as_str()))
                        .collect(),
                    summary: capture(&self.summary, entry),
                }
            })
            .collect()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct ArxivTool {
    client: Client,
    patterns: AtomPatterns,
    max_results: u32,
    max_chars: usize,
}

impl ArxivTool {
    pub fn new(max_results: u32, timeout_secs: u64, max_chars: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            client: http_client(timeout_secs),
            patterns: AtomPatterns::new()?,
            max_results: max_results.max(1),
            max_chars: max_chars.max(1),
        })
    }
}

#[async_trait]
impl Tool for ArxivTool {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn description(&self) -> &str {
        "Search arXiv for scientific papers and return titles, authors and abstracts. Args: {\"query\": \"...\"}"
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
        tracing::info!(query = %query, "arxiv tool execute");
        let mut url = Url::parse(ARXIV_API).map_err(|e| e.to_string())?;
        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{query}"))
            .append_pair("start", "0")
            .append_pair("max_results", &self.max_results.to_string());
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("arXiv request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("arXiv API returned HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let papers = self.patterns.parse(&body);
        if papers.is_empty() {
            return Ok("No good Arxiv Result was found".to_string());
        }
        let text = papers
            .iter()
            .map(|p| {
                format!(
                    "Published: {}\nTitle: {}\nAuthors: {}\nSummary: {}",
                    p.published,
                    p.title,
                    p.authors.join(", "),
                    p.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(text.chars().take(self.max_chars).collect())
    }
}
