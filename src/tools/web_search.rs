//! `web_search` tool backed by the DuckDuckGo HTML endpoint.
//!
//! The HTML-only endpoint needs no JavaScript and no API key. Result
//! links are wrapped in a DuckDuckGo redirect; the real target is carried
//! in the `uddg` query parameter.

use std::time::Duration;

use rand::seq::SliceRandom;
use scraper::{Html, Selector};
use url::Url;

use super::types::{Tool, ToolResult, required_str};
use crate::llm::LlmError;

const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const DEFAULT_MAX_RESULTS: usize = 3;
const MAX_RESULTS_CAP: usize = 5;

/// Browser User-Agent strings, rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// One parsed search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Target URL with the redirect wrapper removed.
    pub url: String,
    /// Result snippet, possibly empty.
    pub snippet: String,
}

/// Searches the web through DuckDuckGo.
pub struct WebSearchTool {
    endpoint: String,
    timeout: Duration,
}

impl WebSearchTool {
    /// Create the tool against the public endpoint.
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, timeout)
    }

    /// Create the tool against a custom endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn fetch(&self, query: &str) -> Result<String, String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(random_user_agent())
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;

        let response = client
            .post(&self.endpoint)
            .form(&[("q", query)])
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("HTTP error: {e}"))?;

        response
            .text()
            .await
            .map_err(|e| format!("response read failed: {e}"))
    }
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Unwrap a DuckDuckGo redirect link (`//duckduckgo.com/l/?uddg=...`).
pub fn extract_url(href: &str) -> Option<String> {
    let full = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&full).ok()?;
    if parsed.host_str() == Some("duckduckgo.com") && parsed.path().starts_with("/l/") {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())
    } else {
        Some(full)
    }
}

/// Parse a DuckDuckGo HTML results page, skipping ads.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(title_sel), Ok(snippet_sel)) = (
        Selector::parse(
            ".result.results_links.results_links_deep:not(.result--ad), .web-result:not(.result--ad)",
        ),
        Selector::parse(".result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for element in document.select(&result_sel) {
        let Some(title_el) = element.select(&title_sel).next() else {
            continue;
        };
        let title = title_el.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        let Some(url) = title_el.value().attr("href").and_then(extract_url) else {
            continue;
        };
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        hits.push(SearchHit {
            title,
            url,
            snippet,
        });
        if hits.len() >= max_results {
            break;
        }
    }
    hits
}

/// Render hits as a numbered list for the model.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_owned();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n   {}\n   {}", i + 1, hit.title, hit.snippet, hit.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "搜索互联网获取实时信息。使用DuckDuckGo搜索引擎，无需API密钥。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "搜索关键词"
                },
                "max_results": {
                    "type": "integer",
                    "description": "最大结果数（1-5，默认3）"
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let query = required_str(&args, "query")?.trim();
        if query.is_empty() {
            return Ok(ToolResult::failure("No search query."));
        }
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map_or(DEFAULT_MAX_RESULTS, |v| v as usize)
            .clamp(1, MAX_RESULTS_CAP);

        tracing::debug!(query = %query, max_results, "web search");

        // The registry runs tools on the blocking pool, so blocking on the
        // runtime handle here does not stall a worker thread.
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LlmError::Tool(format!("no async runtime: {e}")))?;
        match handle.block_on(self.fetch(query)) {
            Ok(html) => Ok(ToolResult::success(format_hits(&parse_results(
                &html,
                max_results,
            )))),
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "web search failed");
                Ok(ToolResult::failure(format!("Search error: {e}")))
            }
        }
    }
}
