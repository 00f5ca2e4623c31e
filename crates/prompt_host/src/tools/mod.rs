//! Auxiliary tools the model may request during the probe round-trip.
//!
//! Before the main completion, the invoker sends one probe request carrying
//! the enabled tool schemas with `tool_choice: auto`. When the model asks
//! for tools they run strictly sequentially, in request order: results
//! thread back into a single linear message list by call id, and running
//! them concurrently would not shorten the critical path.

pub mod search;
pub mod weather;
pub mod website;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use providers::openai::{AssistantReply, ChatRequest, OpenAIClient};
use shared::chat_api::{ChatMessage, ToolDefinition};
use shared::config::{ModelConfig, Preferences};
use shared::error::AssistError;
use shared::events::ToolEvent;

pub use search::SearchTool;
pub use weather::WeatherTool;
pub use website::WebsiteTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Failures become `Err`; the invoker decides whether
    /// they degrade to textual output or abort the action.
    async fn execute(&self, input: serde_json::Value) -> Result<String, AssistError>;
}

/// Ordered set of registered tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in tools, registered once at startup.
    pub fn builtin(prefs: &Preferences) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SearchTool::new()));
        registry.register(Arc::new(WebsiteTool::new()));
        registry.register(Arc::new(WeatherTool::new(prefs.openweather_api_key.clone())));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Tools this model is permitted to call, in registration order.
    pub fn enabled_for(&self, model: &ModelConfig) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|tool| {
                let name = tool.definition().name;
                model.enabled_tools.iter().any(|enabled| *enabled == name)
            })
            .cloned()
            .collect()
    }
}

pub struct ToolInvoker<'a> {
    client: &'a OpenAIClient,
    registry: &'a ToolRegistry,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(client: &'a OpenAIClient, registry: &'a ToolRegistry) -> Self {
        Self { client, registry }
    }

    /// Ask the model whether any enabled tool should run, then execute the
    /// requested calls.
    ///
    /// Returns `None` when the model has no enabled tools (no extra round
    /// trip is made) or when the probe requests none (the probe reply is
    /// discarded and the caller proceeds with a normal completion).
    /// A transport failure on the probe itself is fatal for the action.
    pub async fn call(
        &self,
        model: &ModelConfig,
        user_message: &ChatMessage,
        progress: &UnboundedSender<ToolEvent>,
    ) -> Result<Option<Vec<ChatMessage>>, AssistError> {
        let enabled = self.registry.enabled_for(model);
        if enabled.is_empty() {
            return Ok(None);
        }

        let _ = progress.send(ToolEvent::new("probe", "Detecting tools"));
        let request = ChatRequest {
            model: model.option.clone(),
            temperature: model.temperature_value(),
            messages: vec![user_message.clone()],
            tools: Some(enabled.iter().map(|t| t.definition()).collect()),
        };
        let reply = self.client.generate(&request).await?;
        if reply.tool_calls.is_empty() {
            return Ok(None);
        }

        let messages = run_tool_calls(&enabled, reply, progress).await?;
        Ok(Some(messages))
    }
}

/// Execute requested calls one after another, each wrapped as a tool-result
/// message referencing its originating call id. Per-tool failures degrade
/// to `"No data"` so siblings and the main completion still run; a missing
/// mandatory credential aborts instead.
pub async fn run_tool_calls(
    enabled: &[Arc<dyn Tool>],
    reply: AssistantReply,
    progress: &UnboundedSender<ToolEvent>,
) -> Result<Vec<ChatMessage>, AssistError> {
    let calls = reply.tool_calls.clone();
    let mut messages = vec![ChatMessage::assistant_tool_calls(reply.content, calls.clone())];

    for call in &calls {
        let name = call.function.name.clone();
        let _ = progress.send(ToolEvent::new(
            name.clone(),
            format!("Executing {} with {}", name, call.function.arguments),
        ));

        let Some(tool) = enabled.iter().find(|t| t.definition().name == name) else {
            tracing::warn!(tool = %name, "model requested an unregistered tool");
            continue;
        };
        let input: serde_json::Value = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));

        let output = match tool.execute(input).await {
            Ok(text) => text,
            Err(err @ AssistError::ConfigurationMissing { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(tool = %name, error = %err, "tool execution failed");
                "No data".to_string()
            }
        };
        messages.push(ChatMessage::tool_result(call.id.clone(), output));
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::chat_api::{FunctionCall, ToolCall};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ScriptedTool {
        name: &'static str,
        result: Result<&'static str, &'static str>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: "test tool".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _input: serde_json::Value) -> Result<String, AssistError> {
            self.log.lock().unwrap().push(self.name.to_string());
            match self.result {
                Ok(text) => Ok(text.to_string()),
                Err(detail) => Err(AssistError::ToolFailed {
                    name: self.name.to_string(),
                    detail: detail.to_string(),
                }),
            }
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    fn model_with_tools(names: &[&str]) -> ModelConfig {
        let mut model = ModelConfig::builtin_default();
        model.enabled_tools = names.iter().map(|n| n.to_string()).collect();
        model
    }

    #[tokio::test]
    async fn test_no_enabled_tools_returns_none_without_probe() {
        let prefs = Preferences {
            api_key: "test-key".into(),
            // unreachable on purpose: with no enabled tools the invoker must
            // answer before any request is attempted
            api_endpoint: Some("http://127.0.0.1:9".into()),
            ..Preferences::default()
        };
        let client = OpenAIClient::from_preferences(&prefs).unwrap();
        let registry = ToolRegistry::builtin(&prefs);
        let invoker = ToolInvoker::new(&client, &registry);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = invoker
            .call(
                &model_with_tools(&[]),
                &ChatMessage::user("anything at all"),
                &tx,
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_calls_run_sequentially_in_request_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let enabled: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ScriptedTool {
                name: "alpha",
                result: Ok("A"),
                log: log.clone(),
            }),
            Arc::new(ScriptedTool {
                name: "beta",
                result: Ok("B"),
                log: log.clone(),
            }),
        ];
        let reply = AssistantReply {
            content: None,
            tool_calls: vec![call("call_a", "alpha"), call("call_b", "beta")],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let messages = run_tool_calls(&enabled, reply, &tx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_b"));
    }

    #[tokio::test]
    async fn test_tool_failure_degrades_to_no_data() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let enabled: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ScriptedTool {
                name: "broken",
                result: Err("boom"),
                log: log.clone(),
            }),
            Arc::new(ScriptedTool {
                name: "fine",
                result: Ok("ok"),
                log: log.clone(),
            }),
        ];
        let reply = AssistantReply {
            content: None,
            tool_calls: vec![call("c1", "broken"), call("c2", "fine")],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let messages = run_tool_calls(&enabled, reply, &tx).await.unwrap();
        assert_eq!(
            messages[1].content.as_ref().unwrap().as_text(),
            "No data",
            "failure becomes textual output"
        );
        assert_eq!(messages[2].content.as_ref().unwrap().as_text(), "ok");
    }

    #[tokio::test]
    async fn test_missing_configuration_aborts() {
        struct Unconfigured;
        #[async_trait]
        impl Tool for Unconfigured {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "needs_key".into(),
                    description: String::new(),
                    parameters: json!({}),
                }
            }
            async fn execute(&self, _input: serde_json::Value) -> Result<String, AssistError> {
                Err(AssistError::missing("some API key"))
            }
        }
        let enabled: Vec<Arc<dyn Tool>> = vec![Arc::new(Unconfigured)];
        let reply = AssistantReply {
            content: None,
            tool_calls: vec![call("c1", "needs_key")],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run_tool_calls(&enabled, reply, &tx).await.unwrap_err();
        assert!(matches!(err, AssistError::ConfigurationMissing { .. }));
    }

    #[tokio::test]
    async fn test_unknown_call_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let enabled: Vec<Arc<dyn Tool>> = vec![Arc::new(ScriptedTool {
            name: "known",
            result: Ok("yes"),
            log,
        })];
        let reply = AssistantReply {
            content: None,
            tool_calls: vec![call("c1", "ghost"), call("c2", "known")],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let messages = run_tool_calls(&enabled, reply, &tx).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_registry_filters_by_enabled_names() {
        let prefs = Preferences::default();
        let registry = ToolRegistry::builtin(&prefs);
        let model = model_with_tools(&["website", "search"]);
        let enabled = registry.enabled_for(&model);
        // registration order is preserved, not the model's list order
        let names: Vec<String> = enabled.iter().map(|t| t.definition().name).collect();
        assert_eq!(names, vec!["search", "website"]);
    }

    #[tokio::test]
    async fn test_progress_events_emitted_per_execution() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let enabled: Vec<Arc<dyn Tool>> = vec![Arc::new(ScriptedTool {
            name: "alpha",
            result: Ok("A"),
            log,
        })];
        let reply = AssistantReply {
            content: None,
            tool_calls: vec![call("c1", "alpha")],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_tool_calls(&enabled, reply, &tx).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.tool, "alpha");
        assert!(event.detail.starts_with("Executing alpha"));
    }
}
