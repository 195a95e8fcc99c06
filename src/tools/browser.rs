//! Browser 工具：使用 Headless Chrome 控制浏览器
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 浏览器与当前 Tab 跨调用保留（navigate 之后可 read / click / type / scroll），
//! shutdown 时关闭。headless_chrome 为同步 API，全部在 spawn_blocking 中执行。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, Tab};
use serde_json::Value;

use crate::tools::fetch::html_to_text;
use crate::tools::{SideEffects, Tool};

#[derive(Default)]
struct BrowserSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

pub struct BrowserTool {
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
    session: Arc<Mutex<BrowserSession>>,
}

fn extract_domain(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().map(|h| h.to_lowercase())
}

fn clip(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

fn current_tab(session: &Mutex<BrowserSession>) -> Result<Arc<Tab>, String> {
    let guard = session.lock().map_err(|e| e.to_string())?;
    guard
        .tab
        .clone()
        .ok_or_else(|| "No page open. Use the navigate action first.".to_string())
}

impl BrowserTool {
    pub fn new(allowed_domains: Vec<String>, max_result_chars: usize) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
            max_result_chars: max_result_chars.max(1),
            session: Arc::new(Mutex::new(BrowserSession::default())),
        }
    }

    fn is_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| format!("Invalid or unsupported URL: {url}"))?;
        if self.allowed_domains.is_empty()
            || self
                .allowed_domains
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        {
            Ok(())
        } else {
            Err(format!("Domain not in allowlist: {domain}"))
        }
    }

    async fn blocking<F>(&self, f: F) -> Result<String, String>
    where
        F: FnOnce(Arc<Mutex<BrowserSession>>) -> Result<String, String> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || f(session))
            .await
            .map_err(|e| format!("Task join: {e}"))?
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        r#"Control a headless browser for pages that need JavaScript. The page stays open between calls.
Actions:
- navigate: {"action": "navigate", "url": "https://..."} returns the page text
- read: {"action": "read", "selector": "optional CSS selector"}
- click: {"action": "click", "selector": "CSS selector"}
- type: {"action": "type", "selector": "CSS selector", "text": "..."}
- scroll: {"action": "scroll", "direction": "down" | "up"}"#
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["navigate", "read", "click", "type", "scroll"] },
                "url": { "type": "string" },
                "selector": { "type": "string" },
                "text": { "type": "string" },
                "direction": { "type": "string", "enum": ["up", "down"] }
            },
            "required": ["action"]
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects {
            network: true,
            browser: true,
            ..SideEffects::NONE
        }
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let action = args["action"].as_str().unwrap_or("").to_string();
        let selector = args["selector"].as_str().map(|s| s.to_string());
        let max_chars = self.max_result_chars;

        match action.as_str() {
            "navigate" => {
                let url = args["url"].as_str().unwrap_or("").trim().to_string();
                if url.is_empty() {
                    return Err("Missing url".to_string());
                }
                self.is_allowed(&url)?;
                tracing::info!(url = %url, "browser navigate");
                self.blocking(move |session| {
                    let tab = {
                        let mut guard = session.lock().map_err(|e| e.to_string())?;
                        if guard.browser.is_none() {
                            let browser = Browser::default().map_err(|e| {
                                format!("Chrome launch failed: {e}. Install Chrome/Chromium.")
                            })?;
                            guard.browser = Some(browser);
                        }
                        match guard.tab.clone() {
                            Some(tab) => tab,
                            None => {
                                let tab = guard
                                    .browser
                                    .as_ref()
                                    .ok_or_else(|| "Browser unavailable".to_string())?
                                    .new_tab()
                                    .map_err(|e| format!("Browser tab failed: {e}"))?;
                                guard.tab = Some(Arc::clone(&tab));
                                tab
                            }
                        }
                    };
                    tab.navigate_to(&url)
                        .map_err(|e| format!("Navigate failed: {e}"))?;
                    tab.wait_until_navigated()
                        .map_err(|e| format!("Page load failed: {e}"))?;
                    let title = tab.get_title().unwrap_or_default();
                    let content = tab
                        .get_content()
                        .map_err(|e| format!("Get content failed: {e}"))?;
                    Ok(clip(
                        format!("# {title}\nURL: {url}\n\n{}", html_to_text(&content)),
                        max_chars,
                    ))
                })
                .await
            }
            "read" => {
                self.blocking(move |session| {
                    let tab = current_tab(&session)?;
                    let text = match selector {
                        Some(sel) => tab
                            .wait_for_element(&sel)
                            .map_err(|e| format!("Element not found: {e}"))?
                            .get_inner_text()
                            .map_err(|e| format!("Get text failed: {e}"))?,
                        None => html_to_text(
                            &tab.get_content()
                                .map_err(|e| format!("Get content failed: {e}"))?,
                        ),
                    };
                    Ok(clip(text, max_chars))
                })
                .await
            }
            "click" => {
                let sel = selector.ok_or_else(|| "Missing selector".to_string())?;
                self.blocking(move |session| {
                    let tab = current_tab(&session)?;
                    tab.wait_for_element(&sel)
                        .map_err(|e| format!("Element not found: {e}"))?
                        .click()
                        .map_err(|e| format!("Click failed: {e}"))?;
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(format!("Clicked {sel}; now at {}", tab.get_url()))
                })
                .await
            }
            "type" => {
                let sel = selector.ok_or_else(|| "Missing selector".to_string())?;
                let text = args["text"].as_str().unwrap_or("").to_string();
                self.blocking(move |session| {
                    let tab = current_tab(&session)?;
                    tab.wait_for_element(&sel)
                        .map_err(|e| format!("Element not found: {e}"))?
                        .type_into(&text)
                        .map_err(|e| format!("Type failed: {e}"))?;
                    Ok(format!("Typed {} characters into {sel}", text.chars().count()))
                })
                .await
            }
            "scroll" => {
                let up = args["direction"].as_str() == Some("up");
                self.blocking(move |session| {
                    let tab = current_tab(&session)?;
                    let amount = if up { -600 } else { 600 };
                    tab.evaluate(&format!("window.scrollBy(0, {amount})"), false)
                        .map_err(|e| format!("Scroll failed: {e}"))?;
                    Ok(format!("Scrolled {}", if up { "up" } else { "down" }))
                })
                .await
            }
            other => Err(format!("Unknown browser action: {other}")),
        }
    }

    async fn shutdown(&self) {
        if let Ok(mut guard) = self.session.lock() {
            guard.tab = None;
            if guard.browser.take().is_some() {
                tracing::info!("headless browser closed");
            }
        }
    }
}
