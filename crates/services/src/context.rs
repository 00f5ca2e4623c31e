//! Live context sources consumed during template resolution.
//!
//! Selection, clipboard and browser content are host capabilities; each is a
//! trait here so the pipeline stays testable and hosts without a capability
//! fail with `ContextUnavailable` instead of silently substituting nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared::error::AssistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Markdown,
    Text,
    Html,
}

impl ContentFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markdown" => Some(Self::Markdown),
            "text" => Some(Self::Text),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Html => "html",
        }
    }
}

/// Arguments for one browser-content read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentQuery {
    pub format: ContentFormat,
    pub css_selector: Option<String>,
    pub tab_id: Option<u32>,
}

#[async_trait]
pub trait SelectionSource: Send + Sync {
    async fn selected_text(&self) -> Result<String, AssistError>;
}

#[async_trait]
pub trait ClipboardSource: Send + Sync {
    async fn read_text(&self) -> Result<String, AssistError>;
}

#[async_trait]
pub trait BrowserBridge: Send + Sync {
    async fn content(&self, query: &ContentQuery) -> Result<String, AssistError>;
}

/// Clipboard reader backed by the OS clipboard.
pub struct SystemClipboard;

#[async_trait]
impl ClipboardSource for SystemClipboard {
    async fn read_text(&self) -> Result<String, AssistError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|_| AssistError::context("clipboard"))?;
        // An empty clipboard reads as an error in arboard; the template
        // contract wants an empty string there.
        Ok(clipboard.get_text().unwrap_or_default())
    }
}

/// Placeholder for hosts without a text-selection accessor.
pub struct NoSelection;

#[async_trait]
impl SelectionSource for NoSelection {
    async fn selected_text(&self) -> Result<String, AssistError> {
        Err(AssistError::context("selected text"))
    }
}

/// Placeholder for hosts without a browser extension.
pub struct NoBrowser;

#[async_trait]
impl BrowserBridge for NoBrowser {
    async fn content(&self, _query: &ContentQuery) -> Result<String, AssistError> {
        Err(AssistError::context("browser content"))
    }
}

/// Numeric character references the browser accessor is known to
/// over-escape in its text output.
const OVER_ESCAPED: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&#32;", " "),
    ("&#33;", "!"),
    ("&#34;", "\""),
    ("&#35;", "#"),
    ("&#36;", "$"),
    ("&#37;", "%"),
    ("&#38;", "&"),
    ("&#39;", "'"),
    ("&#40;", "("),
    ("&#41;", ")"),
    ("&#42;", "*"),
    ("&#43;", "+"),
    ("&#44;", ","),
    ("&#45;", "-"),
    ("&#46;", "."),
    ("&#47;", "/"),
    ("&#91;", "["),
    ("&#92;", "\\"),
    ("&#93;", "]"),
    ("&#94;", "^"),
    ("&#95;", "_"),
    ("&#96;", "`"),
    ("&#123;", "{"),
    ("&#124;", "|"),
    ("&#125;", "}"),
    ("&#126;", "~"),
];

pub fn decode_numeric_refs(text: &str) -> String {
    OVER_ESCAPED
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Read browser content and undo the accessor's over-escaping, once, on the
/// final resolved text.
pub async fn fetch_browser_content(
    bridge: &dyn BrowserBridge,
    query: &ContentQuery,
) -> Result<String, AssistError> {
    let content = bridge.content(query).await?;
    Ok(decode_numeric_refs(&content))
}
