//! Prompt template expansion against live context sources.
//!
//! Templates carry `{{name}}` placeholders, optionally with attributes
//! (`{{content format="text" cssSelector="h1"}}`), plus `{{#name}}...{{/name}}`
//! sections. Each distinct recognized key resolves at most once per render;
//! unrecognized placeholders stay in the output byte for byte.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use services::context::{
    fetch_browser_content, BrowserBridge, ClipboardSource, ContentFormat, ContentQuery,
    SelectionSource,
};
use shared::error::AssistError;

// ── Parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Span {
    Literal(String),
    /// `{{key}}`; `raw` is the original tag text for unresolved passthrough.
    Tag {
        key: String,
        raw: String,
    },
    Section {
        key: String,
        inverted: bool,
        raw_open: String,
        raw_close: String,
        children: Vec<Span>,
    },
}

enum Token {
    Literal(String),
    Name { key: String, raw: String },
    Open { key: String, raw: String, inverted: bool },
    Close { key: String, raw: String },
}

fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // unterminated tag: keep the remainder as literal text
            tokens.push(Token::Literal(rest[start..].to_string()));
            return tokens;
        };
        let raw = rest[start..start + end + 4].to_string();
        let inner = after[..end].trim();
        if let Some(key) = inner.strip_prefix('#') {
            tokens.push(Token::Open {
                key: key.trim().to_string(),
                raw,
                inverted: false,
            });
        } else if let Some(key) = inner.strip_prefix('^') {
            tokens.push(Token::Open {
                key: key.trim().to_string(),
                raw,
                inverted: true,
            });
        } else if let Some(key) = inner.strip_prefix('/') {
            tokens.push(Token::Close {
                key: key.trim().to_string(),
                raw,
            });
        } else if !inner.starts_with('!') {
            // '!' comments are dropped
            tokens.push(Token::Name {
                key: inner.to_string(),
                raw,
            });
        }
        rest = &rest[start + end + 4..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest.to_string()));
    }
    tokens
}

fn parse(template: &str) -> Vec<Span> {
    struct Frame {
        key: String,
        inverted: bool,
        raw_open: String,
        children: Vec<Span>,
    }

    let mut stack: Vec<Frame> = Vec::new();
    let mut top: Vec<Span> = Vec::new();

    let push = |stack: &mut Vec<Frame>, top: &mut Vec<Span>, span: Span| {
        match stack.last_mut() {
            Some(frame) => frame.children.push(span),
            None => top.push(span),
        }
    };

    for token in tokenize(template) {
        match token {
            Token::Literal(text) => push(&mut stack, &mut top, Span::Literal(text)),
            Token::Name { key, raw } => push(&mut stack, &mut top, Span::Tag { key, raw }),
            Token::Open { key, raw, inverted } => stack.push(Frame {
                key,
                inverted,
                raw_open: raw,
                children: Vec::new(),
            }),
            Token::Close { key, raw } => {
                if stack.last().map(|f| f.key == key).unwrap_or(false) {
                    let frame = stack.pop().expect("matched close");
                    push(
                        &mut stack,
                        &mut top,
                        Span::Section {
                            key: frame.key,
                            inverted: frame.inverted,
                            raw_open: frame.raw_open,
                            raw_close: raw,
                            children: frame.children,
                        },
                    );
                } else {
                    // stray close tag: keep it as literal text
                    push(&mut stack, &mut top, Span::Literal(raw));
                }
            }
        }
    }

    // Unclosed sections degrade to their literal open tag plus children.
    while let Some(frame) = stack.pop() {
        let mut spans = vec![Span::Literal(frame.raw_open)];
        spans.extend(frame.children);
        for span in spans {
            match stack.last_mut() {
                Some(parent) => parent.children.push(span),
                None => top.push(span),
            }
        }
    }
    top
}

/// Collect distinct referenced keys in first-occurrence order. Section keys
/// count as references; inverted-section keys do not (their body still does).
fn collect_keys(spans: &[Span], keys: &mut Vec<String>) {
    let add = |keys: &mut Vec<String>, key: &str| {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    };
    for span in spans {
        match span {
            Span::Literal(_) => {}
            Span::Tag { key, .. } => add(keys, key),
            Span::Section {
                key,
                inverted,
                children,
                ..
            } => {
                if !inverted {
                    add(keys, key);
                }
                collect_keys(children, keys);
            }
        }
    }
}

// ── Context dispatch ─────────────────────────────────────────────────

/// Where a placeholder key resolves from. A closed set so dispatch stays
/// exhaustiveness-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextBinding {
    Selection,
    Clipboard,
    BrowserContent(ContentQuery),
    Unknown,
}

static CONTENT_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"content\s*(?:format="(?P<format>markdown|text|html)")?\s*(?:cssSelector="(?P<cssSelector>[^"]+)")?\s*(?:tabId=(?P<tabId>\d+))?"#,
    )
    .expect("content attribute regex")
});

pub fn classify(key: &str) -> ContextBinding {
    match key {
        "select" | "selectText" | "selection" => ContextBinding::Selection,
        "clipboard" | "clipboardText" => ContextBinding::Clipboard,
        _ if key.starts_with("content") => ContextBinding::BrowserContent(parse_content_query(key)),
        _ => ContextBinding::Unknown,
    }
}

/// Parse the attribute tail of a `content` key. Unrecognized attributes are
/// ignored, not errors.
fn parse_content_query(key: &str) -> ContentQuery {
    let Some(caps) = CONTENT_ATTRS.captures(key) else {
        return ContentQuery::default();
    };
    ContentQuery {
        format: caps
            .name("format")
            .and_then(|m| ContentFormat::parse(m.as_str()))
            .unwrap_or_default(),
        css_selector: caps.name("cssSelector").map(|m| m.as_str().to_string()),
        tab_id: caps.name("tabId").and_then(|m| m.as_str().parse().ok()),
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Result of one template render.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub expanded: String,
    /// First resolved context value in occurrence order, for callers that
    /// need a single extracted text (e.g. diffing against the answer).
    pub primary: Option<String>,
}

pub struct TemplateEngine {
    selection: Arc<dyn SelectionSource>,
    clipboard: Arc<dyn ClipboardSource>,
    browser: Arc<dyn BrowserBridge>,
}

impl TemplateEngine {
    pub fn new(
        selection: Arc<dyn SelectionSource>,
        clipboard: Arc<dyn ClipboardSource>,
        browser: Arc<dyn BrowserBridge>,
    ) -> Self {
        Self {
            selection,
            clipboard,
            browser,
        }
    }

    /// Expand `template`, resolving each distinct recognized key exactly
    /// once. An unavailable source fails the whole render; silently
    /// substituting an empty string would corrupt the prompt.
    pub async fn render(&self, template: &str) -> Result<Rendered, AssistError> {
        let spans = parse(template);

        let mut keys = Vec::new();
        collect_keys(&spans, &mut keys);

        let mut view: Vec<(String, String)> = Vec::new();
        for key in keys {
            match classify(&key) {
                ContextBinding::Selection => {
                    let value = self.selection.selected_text().await?;
                    view.push((key, value));
                }
                ContextBinding::Clipboard => {
                    let value = self.clipboard.read_text().await?;
                    view.push((key, value));
                }
                ContextBinding::BrowserContent(query) => {
                    let value = fetch_browser_content(self.browser.as_ref(), &query).await?;
                    view.push((key, value));
                }
                ContextBinding::Unknown => {}
            }
        }

        let expanded = substitute(&spans, &view);
        let primary = view.first().map(|(_, value)| value.clone());
        Ok(Rendered { expanded, primary })
    }
}

fn lookup<'a>(view: &'a [(String, String)], key: &str) -> Option<&'a str> {
    view.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn substitute(spans: &[Span], view: &[(String, String)]) -> String {
    let mut out = String::new();
    for span in spans {
        match span {
            Span::Literal(text) => out.push_str(text),
            Span::Tag { key, raw } => match lookup(view, key) {
                Some(value) => out.push_str(value),
                None => out.push_str(raw),
            },
            Span::Section {
                key,
                inverted,
                raw_open,
                raw_close,
                children,
            } => match lookup(view, key) {
                Some(value) => {
                    if !value.is_empty() != *inverted {
                        out.push_str(&substitute(children, view));
                    }
                }
                None if *inverted => {
                    // an unresolved key is falsy: inverted body renders
                    out.push_str(&substitute(children, view));
                }
                None => {
                    out.push_str(raw_open);
                    out.push_str(&substitute(children, view));
                    out.push_str(raw_close);
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticSelection {
        text: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SelectionSource for StaticSelection {
        async fn selected_text(&self) -> Result<String, AssistError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    struct StaticClipboard(&'static str);

    #[async_trait]
    impl ClipboardSource for StaticClipboard {
        async fn read_text(&self) -> Result<String, AssistError> {
            Ok(self.0.to_string())
        }
    }

    struct RecordingBrowser {
        queries: Mutex<Vec<ContentQuery>>,
    }

    #[async_trait]
    impl BrowserBridge for RecordingBrowser {
        async fn content(&self, query: &ContentQuery) -> Result<String, AssistError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok("PAGE".to_string())
        }
    }

    fn engine_with(
        selection: Arc<StaticSelection>,
        browser: Arc<RecordingBrowser>,
    ) -> TemplateEngine {
        TemplateEngine::new(selection, Arc::new(StaticClipboard("CLIP")), browser)
    }

    fn fixtures() -> (Arc<StaticSelection>, Arc<RecordingBrowser>) {
        (
            Arc::new(StaticSelection {
                text: "SEL",
                calls: AtomicUsize::new(0),
            }),
            Arc::new(RecordingBrowser {
                queries: Mutex::new(Vec::new()),
            }),
        )
    }

    #[tokio::test]
    async fn test_recognized_keys_substituted_in_place() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser);
        let rendered = engine
            .render("Summarize: {{select}} and {{clipboard}}.")
            .await
            .unwrap();
        assert_eq!(rendered.expanded, "Summarize: SEL and CLIP.");
        assert!(!rendered.expanded.contains("{{"));
    }

    #[tokio::test]
    async fn test_unknown_placeholder_preserved_verbatim() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser);
        let rendered = engine.render("{{select}} and {{mystery tag}}").await.unwrap();
        assert_eq!(rendered.expanded, "SEL and {{mystery tag}}");
    }

    #[tokio::test]
    async fn test_each_key_resolved_once() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel.clone(), browser);
        engine
            .render("{{select}} ... {{select}} ... {{select}}")
            .await
            .unwrap();
        assert_eq!(sel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_is_first_resolved_value() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser);
        let rendered = engine.render("{{clipboard}} then {{select}}").await.unwrap();
        assert_eq!(rendered.primary.as_deref(), Some("CLIP"));
    }

    #[tokio::test]
    async fn test_content_attributes_reach_bridge_and_are_consumed() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser.clone());
        let rendered = engine
            .render(r#"Read {{content format="text" cssSelector="h1"}} now"#)
            .await
            .unwrap();
        assert_eq!(rendered.expanded, "Read PAGE now");
        let queries = browser.queries.lock().unwrap();
        assert_eq!(
            queries[0],
            ContentQuery {
                format: ContentFormat::Text,
                css_selector: Some("h1".into()),
                tab_id: None,
            }
        );
    }

    #[tokio::test]
    async fn test_content_defaults_to_markdown() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser.clone());
        engine.render("{{content}}").await.unwrap();
        assert_eq!(
            browser.queries.lock().unwrap()[0].format,
            ContentFormat::Markdown
        );
    }

    #[tokio::test]
    async fn test_content_tab_id_parsed() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser.clone());
        engine.render("{{content tabId=3}}").await.unwrap();
        assert_eq!(browser.queries.lock().unwrap()[0].tab_id, Some(3));
    }

    #[tokio::test]
    async fn test_section_with_resolved_key_renders_body() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel.clone(), browser);
        let rendered = engine
            .render("{{#select}}picked: {{select}}{{/select}}")
            .await
            .unwrap();
        assert_eq!(rendered.expanded, "picked: SEL");
        // the section key and the inner tag are the same reference
        assert_eq!(sel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_section_stays_literal() {
        let (sel, browser) = fixtures();
        let engine = engine_with(sel, browser);
        let rendered = engine.render("{{#flag}}body{{/flag}}").await.unwrap();
        assert_eq!(rendered.expanded, "{{#flag}}body{{/flag}}");
    }

    #[tokio::test]
    async fn test_unavailable_source_propagates() {
        struct FailingSelection;
        #[async_trait]
        impl SelectionSource for FailingSelection {
            async fn selected_text(&self) -> Result<String, AssistError> {
                Err(AssistError::context("selected text"))
            }
        }
        let (_, browser) = fixtures();
        let engine = TemplateEngine::new(
            Arc::new(FailingSelection),
            Arc::new(StaticClipboard("CLIP")),
            browser,
        );
        let err = engine.render("{{select}}").await.unwrap_err();
        assert!(matches!(err, AssistError::ContextUnavailable { .. }));
    }

    #[test]
    fn test_classify_dispatch() {
        assert_eq!(classify("select"), ContextBinding::Selection);
        assert_eq!(classify("selectText"), ContextBinding::Selection);
        assert_eq!(classify("selection"), ContextBinding::Selection);
        assert_eq!(classify("clipboardText"), ContextBinding::Clipboard);
        assert!(matches!(
            classify("content"),
            ContextBinding::BrowserContent(_)
        ));
        assert_eq!(classify("whatever"), ContextBinding::Unknown);
    }

    #[test]
    fn test_unrecognized_attribute_ignored() {
        let query = parse_content_query(r#"content format="html" charset="utf-8""#);
        assert_eq!(query.format, ContentFormat::Html);
        assert_eq!(query.css_selector, None);
    }
}
