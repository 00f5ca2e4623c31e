//! Webpage fetch tool: URL in, readable text out.

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use serde_json::json;

use shared::chat_api::ToolDefinition;
use shared::error::AssistError;

use super::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; QuickAsk/1.0)";

/// Keeps one page from eating the whole context window.
const MAX_CONTENT_CHARS: usize = 12_000;

pub struct WebsiteTool {
    http: Client,
}

impl WebsiteTool {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, AssistError> {
        let fail = |detail: String| AssistError::ToolFailed {
            name: "website".into(),
            detail,
        };
        let html = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(e.to_string()))?
            .text()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let mut text = from_read(html.as_bytes(), 80).trim().to_string();
        if text.is_empty() {
            return Err(fail("page had no readable content".into()));
        }
        if text.len() > MAX_CONTENT_CHARS {
            let cut = text
                .char_indices()
                .take_while(|(i, _)| *i < MAX_CONTENT_CHARS)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(MAX_CONTENT_CHARS);
            text.truncate(cut);
            text.push_str("\n[content truncated]");
        }
        Ok(text)
    }
}

impl Default for WebsiteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebsiteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "website".to_string(),
            description: "Fetch the content of a website by its url".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "the url of the website"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, AssistError> {
        let url = input.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        if !url.starts_with("http") {
            return Err(AssistError::ToolFailed {
                name: "website".into(),
                detail: format!("not a fetchable url: {}", url),
            });
        }
        tracing::debug!(url, "fetching page content");
        self.fetch(url).await
    }
}
