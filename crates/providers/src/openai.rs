//! OpenAI-compatible chat completion client.
//!
//! Speaks the `/chat/completions` contract: non-streaming requests, SSE
//! streaming, and the tool-probe variant that advertises function schemas
//! with `tool_choice: auto`. Azure deployments are reached through the same
//! path with an `api-key` header and `api-version` query parameter.

use std::sync::LazyLock;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use shared::chat_api::{ChatMessage, StreamChunk, ToolCall, ToolDefinition};
use shared::config::{Preferences, AZURE_API_VERSION};
use shared::error::{classify_transport, AssistError};

use crate::sse::SseParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

// ── Request types ────────────────────────────────────────────────────

/// A fully assembled chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    /// When present the request becomes a tool probe with `tool_choice: auto`.
    pub tools: Option<Vec<ToolDefinition>>,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolDefinition,
}

fn to_wire<'a>(req: &'a ChatRequest, stream: bool) -> WireRequest<'a> {
    let tools: Option<Vec<WireTool<'a>>> = req.tools.as_ref().map(|defs| {
        defs.iter()
            .map(|function| WireTool {
                tool_type: "function",
                function,
            })
            .collect()
    });
    let tool_choice = tools.as_ref().map(|_| "auto");
    WireRequest {
        model: &req.model,
        temperature: req.temperature,
        messages: &req.messages,
        tools,
        tool_choice,
        stream: stream.then_some(true),
    }
}

// ── Response types ───────────────────────────────────────────────────

/// The assistant message of a non-streaming completion.
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireStreamResponse {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

#[derive(Debug)]
enum AuthStyle {
    Bearer(String),
    AzureKey(String),
}

#[derive(Debug)]
pub struct OpenAIClient {
    http: Client,
    auth: AuthStyle,
    base_url: String,
}

impl OpenAIClient {
    pub fn from_preferences(prefs: &Preferences) -> Result<Self, AssistError> {
        if prefs.api_key.trim().is_empty() {
            return Err(AssistError::missing("api key"));
        }
        let auth = if prefs.azure.is_some() {
            AuthStyle::AzureKey(prefs.api_key.clone())
        } else {
            AuthStyle::Bearer(prefs.api_key.clone())
        };
        Ok(Self {
            http: SHARED_HTTP.clone(),
            auth,
            base_url: prefs.config_url(),
        })
    }

    async fn send(
        &self,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AssistError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %req.model, stream, tools = req.tools.is_some(), "chat completion request");
        let mut builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        match &self.auth {
            AuthStyle::Bearer(key) => {
                builder = builder.header("Authorization", format!("Bearer {}", key));
            }
            AuthStyle::AzureKey(key) => {
                builder = builder
                    .header("api-key", key.clone())
                    .query(&[("api-version", AZURE_API_VERSION)]);
            }
        }
        let resp = builder
            .json(&to_wire(req, stream))
            .send()
            .await
            .map_err(|e| AssistError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            let detail = if detail.trim().is_empty() {
                format!("provider error: {}", status)
            } else {
                format!("provider error: {}\n{}", status, detail)
            };
            return Err(classify_transport(Some(status), &detail));
        }
        Ok(resp)
    }

    /// Whole-answer completion. Also used for the tool probe, where the
    /// interesting part of the reply is `tool_calls`.
    pub async fn generate(&self, req: &ChatRequest) -> Result<AssistantReply, AssistError> {
        let resp = self.send(req, false).await?;
        let body: WireResponse = resp
            .json()
            .await
            .map_err(|e| AssistError::transport(format!("malformed response: {}", e)))?;
        let reply = match body.choices.into_iter().next() {
            Some(choice) => AssistantReply {
                content: choice.message.content,
                tool_calls: choice.message.tool_calls.unwrap_or_default(),
            },
            None => AssistantReply::default(),
        };
        Ok(reply)
    }

    /// Streaming completion; text deltas land on `tx` in arrival order.
    ///
    /// A failure before the stream opens returns `Err`. Once bytes are
    /// flowing, a read error also returns `Err` but whatever was already
    /// forwarded stays with the receiver.
    pub async fn generate_stream(
        &self,
        req: &ChatRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), AssistError> {
        let resp = self.send(req, true).await?;

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes =
                chunk.map_err(|e| AssistError::transport(format!("stream read error: {}", e)))?;
            for event in parser.feed(&bytes) {
                if event.data == "[DONE]" {
                    let _ = tx.send(StreamChunk::Done { stop_reason: None });
                    return Ok(());
                }
                let parsed: WireStreamResponse = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    // keep-alives and comment frames are not JSON
                    Err(_) => continue,
                };
                if let Some(choice) = parsed.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty() {
                            let _ = tx.send(StreamChunk::Text(content.clone()));
                        }
                    }
                    if let Some(reason) = &choice.finish_reason {
                        let _ = tx.send(StreamChunk::Done {
                            stop_reason: Some(reason.clone()),
                        });
                        return Ok(());
                    }
                }
            }
        }

        let _ = tx.send(StreamChunk::Done { stop_reason: None });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request(tools: Option<Vec<ToolDefinition>>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            temperature: 0.8,
            messages: vec![ChatMessage::user("hello")],
            tools,
        }
    }

    #[test]
    fn test_plain_request_omits_tool_fields() {
        let wire = serde_json::to_value(to_wire(&sample_request(None), false)).unwrap();
        assert_eq!(wire["model"], "gpt-4o-mini");
        assert!(wire.get("tools").is_none());
        assert!(wire.get("tool_choice").is_none());
        assert!(wire.get("stream").is_none());
    }

    #[test]
    fn test_probe_request_advertises_tools_with_auto_choice() {
        let defs = vec![ToolDefinition {
            name: "search".into(),
            description: "search the web".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }];
        let wire = serde_json::to_value(to_wire(&sample_request(Some(defs)), false)).unwrap();
        assert_eq!(wire["tool_choice"], "auto");
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn test_stream_flag_serialized_when_set() {
        let wire = serde_json::to_value(to_wire(&sample_request(None), true)).unwrap();
        assert_eq!(wire["stream"], true);
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let err = OpenAIClient::from_preferences(&Preferences::default()).unwrap_err();
        assert!(matches!(err, AssistError::ConfigurationMissing { .. }));
    }

    #[test]
    fn test_response_with_tool_calls_parses() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{}"}
                    }]
                }
            }]
        });
        let parsed: WireResponse = serde_json::from_value(body).unwrap();
        let msg = &parsed.choices[0].message;
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls.as_ref().unwrap()[0].function.name, "search");
    }
}
