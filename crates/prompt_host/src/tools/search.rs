//! Web search tool backed by DuckDuckGo's HTML interface.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;

use shared::chat_api::ToolDefinition;
use shared::error::AssistError;

use super::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; QuickAsk/1.0)";

pub struct SearchTool {
    http: Client,
}

impl SearchTool {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn search(&self, keywords: &str) -> Result<String, AssistError> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(keywords)
        );
        let html = self
            .http
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AssistError::ToolFailed {
                name: "search".into(),
                detail: e.to_string(),
            })?
            .text()
            .await
            .map_err(|e| AssistError::ToolFailed {
                name: "search".into(),
                detail: e.to_string(),
            })?;

        let results = parse_results(&html);
        if results.is_empty() {
            return Ok("No results found.".to_string());
        }
        Ok(results
            .iter()
            .enumerate()
            .map(|(i, (title, snippet, url))| {
                format!("{}. {}\n   {}\n   URL: {}\n", i + 1, title, snippet, url)
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search".to_string(),
            description: "Useful for searching the web to retrieve real-time and accurate information"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "keywords": {
                        "type": "string",
                        "description": "the keywords used for search engine to search the web"
                    }
                },
                "required": ["keywords"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, AssistError> {
        let keywords = input
            .get("keywords")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if keywords.trim().is_empty() {
            return Err(AssistError::ToolFailed {
                name: "search".into(),
                detail: "empty query".into(),
            });
        }
        tracing::debug!(keywords, "running web search");
        self.search(keywords).await
    }
}

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="result__a"[^>]*href="([^"]*)"[^>]*>([^<]+)</a>"#).expect("title regex")
});
static SNIPPET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="result__snippet"[^>]*>([^<]+)"#).expect("snippet regex"));

/// Extract (title, snippet, url) triples from the results page.
fn parse_results(html: &str) -> Vec<(String, String, String)> {
    let titles: Vec<(String, String)> = TITLE_RE
        .captures_iter(html)
        .filter_map(|cap| {
            let href = cap.get(1)?.as_str();
            let title = cap.get(2)?.as_str();
            Some((html_decode(title), resolve_redirect(href)))
        })
        .collect();

    let snippets: Vec<String> = SNIPPET_RE
        .captures_iter(html)
        .filter_map(|cap| cap.get(1).map(|m| html_decode(m.as_str())))
        .collect();

    titles
        .into_iter()
        .take(10)
        .enumerate()
        .filter(|(_, (title, _))| !title.is_empty())
        .map(|(i, (title, url))| {
            let snippet = snippets.get(i).cloned().unwrap_or_default();
            (title, snippet, url)
        })
        .collect()
}

/// DuckDuckGo wraps result links in a redirect with the target in `uddg=`.
fn resolve_redirect(href: &str) -> String {
    match href.split("uddg=").nth(1) {
        Some(encoded) => {
            let encoded = encoded.split('&').next().unwrap_or(encoded);
            urlencoding::decode(encoded)
                .map(|u| u.into_owned())
                .unwrap_or_else(|_| href.to_string())
        }
        None => href.to_string(),
    }
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r##"
        <a class="result__a" href="/l/?uddg=https%3A%2F%2Fexample.com%2Fa&amp;rut=x">First &amp; Best</a>
        <a class="result__snippet" href="#">A snippet about things.</a>
        <a class="result__a" href="https://plain.example.org">Second</a>
        <a class="result__snippet" href="#">Another snippet.</a>
    "##;

    #[test]
    fn test_parse_results_extracts_triples() {
        let results = parse_results(FIXTURE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "First & Best");
        assert_eq!(results[0].1, "A snippet about things.");
        assert_eq!(results[0].2, "https://example.com/a");
        assert_eq!(results[1].2, "https://plain.example.org");
    }

    #[test]
    fn test_parse_results_empty_page() {
        assert!(parse_results("<html><body>nothing here</body></html>").is_empty());
    }

    #[tokio::test]
    async fn test_empty_keywords_rejected() {
        let tool = SearchTool::new();
        let err = tool
            .execute(serde_json::json!({"keywords": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::ToolFailed { .. }));
    }
}
