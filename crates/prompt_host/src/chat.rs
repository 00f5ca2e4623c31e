//! Chat request orchestration.
//!
//! One `ask` drives the whole pipeline: turn creation, user-message
//! assembly, the optional tool probe, history trimming, and the streaming
//! or whole-answer completion. A session is one logical task: `&mut self`
//! serializes asks, and the turn list is only touched from that task, so no
//! locking is needed. There is no cancellation token: a host that walks
//! away mid-stream just drops the results.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use uuid::Uuid;

use providers::openai::{ChatRequest, OpenAIClient};
use services::speech::SpeechSynthesizer;
use shared::chat_api::{ChatMessage, ChatTurn, StreamChunk};
use shared::config::{Action, ModelConfig, Preferences};
use shared::error::AssistError;
use shared::events::ToolEvent;

use crate::attachments;
use crate::history::HistoryStore;
use crate::template::TemplateEngine;
use crate::token_window::TokenEstimator;
use crate::tools::{ToolInvoker, ToolRegistry};

/// Orchestration phase, observable by the host for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ResolvingContext,
    ToolProbe,
    Requesting,
    Streaming,
    Completing,
    Done,
    Error,
}

/// Terminal outcome of one ask, for the host's notification surface. The
/// in-progress indicator should be mutated in place to one of these.
#[derive(Debug, Clone)]
pub enum AskOutcome {
    Answered,
    RateLimited { message: String },
    Failed { message: String },
}

/// Receives the answer as it is produced. Streaming and whole-answer
/// delivery are two implementations of the same interface, selected at
/// request time.
pub trait CompletionSink: Send {
    fn on_delta(&mut self, text: &str);
    fn on_complete(&mut self, full_text: &str);
    fn answer(&self) -> &str;
}

/// Publishes the growing partial turn on every delta.
struct StreamingSink {
    partial: ChatTurn,
    publisher: watch::Sender<Option<ChatTurn>>,
}

impl StreamingSink {
    fn new(partial: ChatTurn, publisher: watch::Sender<Option<ChatTurn>>) -> Self {
        Self { partial, publisher }
    }
}

impl CompletionSink for StreamingSink {
    fn on_delta(&mut self, text: &str) {
        self.partial.answer.push_str(text);
        self.publisher.send_replace(Some(self.partial.clone()));
    }

    fn on_complete(&mut self, full_text: &str) {
        if self.partial.answer.is_empty() {
            self.partial.answer = full_text.to_string();
        }
    }

    fn answer(&self) -> &str {
        &self.partial.answer
    }
}

/// Buffers the whole answer for single-update delivery.
#[derive(Default)]
struct WholeAnswerSink {
    answer: String,
}

impl CompletionSink for WholeAnswerSink {
    fn on_delta(&mut self, text: &str) {
        self.answer.push_str(text);
    }

    fn on_complete(&mut self, full_text: &str) {
        self.answer = full_text.to_string();
    }

    fn answer(&self) -> &str {
        &self.answer
    }
}

/// Subscription ends handed to the host at session construction, so event
/// plumbing is explicit and cannot leak listeners across runs.
pub struct ChatSubscriptions {
    /// Partial turn state, republished on every streamed delta and cleared
    /// shortly after the stream completes.
    pub stream: watch::Receiver<Option<ChatTurn>>,
    /// Tool progress ("Detecting tools", "Executing search with ...").
    pub tool_events: UnboundedReceiver<ToolEvent>,
}

pub struct ChatSession {
    prefs: Preferences,
    client: Arc<OpenAIClient>,
    registry: ToolRegistry,
    history: HistoryStore,
    speech: Arc<dyn SpeechSynthesizer>,
    turns: Vec<ChatTurn>,
    selected: Option<Uuid>,
    loading: bool,
    phase: Phase,
    /// Primary resolved context of the last action, for diff rendering.
    last_resolved: Option<String>,
    stream_tx: watch::Sender<Option<ChatTurn>>,
    progress_tx: UnboundedSender<ToolEvent>,
}

impl ChatSession {
    pub fn new(
        prefs: Preferences,
        client: OpenAIClient,
        registry: ToolRegistry,
        history: HistoryStore,
        speech: Arc<dyn SpeechSynthesizer>,
    ) -> (Self, ChatSubscriptions) {
        let (stream_tx, stream_rx) = watch::channel(None);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let turns = history.all().to_vec();
        (
            Self {
                prefs,
                client: Arc::new(client),
                registry,
                history,
                speech,
                turns,
                selected: None,
                loading: false,
                phase: Phase::Idle,
                last_resolved: None,
                stream_tx,
                progress_tx,
            },
            ChatSubscriptions {
                stream: stream_rx,
                tool_events: progress_rx,
            },
        )
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn selected_turn_id(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_resolved(&self) -> Option<&str> {
        self.last_resolved.as_deref()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.selected = None;
    }

    /// Resolve an action's template against live context, then ask.
    pub async fn ask_action(
        &mut self,
        engine: &TemplateEngine,
        action: &Action,
        model: &ModelConfig,
    ) -> AskOutcome {
        self.loading = true;
        self.phase = Phase::ResolvingContext;
        let rendered = match engine.render(&action.prompt).await {
            Ok(rendered) => rendered,
            Err(err) => {
                self.phase = Phase::Error;
                self.loading = false;
                return outcome_for(err);
            }
        };
        self.last_resolved = rendered.primary;
        self.ask(&rendered.expanded, &[], model).await
    }

    /// Run one question end to end. Results arrive incrementally through
    /// the stream subscription; the returned outcome is the terminal state
    /// for the host's notification.
    pub async fn ask(
        &mut self,
        question: &str,
        files: &[String],
        model: &ModelConfig,
    ) -> AskOutcome {
        self.loading = true;
        let turn = ChatTurn::new(question, files.to_vec());
        let turn_id = turn.id;
        self.turns.push(turn);
        // mark active so the host can route incremental updates to it
        self.selected = Some(turn_id);

        let outcome = match self.run_turn(turn_id, model).await {
            Ok(()) => {
                self.phase = Phase::Done;
                AskOutcome::Answered
            }
            Err(err) => {
                self.phase = Phase::Error;
                outcome_for(err)
            }
        };
        // the loading indicator clears on every exit path
        self.loading = false;
        outcome
    }

    async fn run_turn(&mut self, turn_id: Uuid, model: &ModelConfig) -> Result<(), AssistError> {
        let (question, files) = {
            let turn = self.turn(turn_id);
            (turn.question.clone(), turn.files.clone())
        };

        let user_message = if files.is_empty() {
            ChatMessage::user(question)
        } else {
            ChatMessage::user_parts(attachments::build_user_parts(&question, &files)?)
        };

        // Optional tool round-trip before the main completion.
        self.phase = Phase::ToolProbe;
        let tool_messages = ToolInvoker::new(self.client.as_ref(), &self.registry)
            .call(model, &user_message, &self.progress_tx)
            .await?;
        if let Some(messages) = &tool_messages {
            self.turn_mut(turn_id).tool_trace = trace_from(messages);
        }

        // Trim prior turns to the target model's context window.
        let estimator = TokenEstimator::new(&model.option);
        let prior: Vec<ChatTurn> = self
            .turns
            .iter()
            .filter(|t| t.id != turn_id)
            .cloned()
            .collect();
        let window = estimator.limit(&prior);

        let request = ChatRequest {
            model: model.option.clone(),
            temperature: model.temperature_value(),
            messages: assemble_messages(&model.prompt, &window, tool_messages, user_message),
            tools: None,
        };

        let answer = if self.prefs.use_stream {
            self.stream_completion(turn_id, request).await?
        } else {
            self.phase = Phase::Requesting;
            let reply = self.client.generate(&request).await?;
            self.phase = Phase::Completing;
            let mut sink = WholeAnswerSink::default();
            sink.on_complete(reply.content.as_deref().unwrap_or_default());
            sink.answer().to_string()
        };

        self.turn_mut(turn_id).answer = answer.clone();

        if !self.prefs.history_paused {
            let finished = self.turn(turn_id).clone();
            if let Err(e) = self.history.add(finished).await {
                tracing::warn!(error = %e, "failed to persist turn to history");
            }
        }
        if self.prefs.auto_tts {
            // speak() stops any in-progress utterance first
            self.speech.speak(&answer).await;
        }
        Ok(())
    }

    async fn stream_completion(
        &mut self,
        turn_id: Uuid,
        request: ChatRequest,
    ) -> Result<String, AssistError> {
        self.phase = Phase::Requesting;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let sender = tokio::spawn(async move { client.generate_stream(&request, tx).await });

        let mut sink = StreamingSink::new(self.turn(turn_id).clone(), self.stream_tx.clone());
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Text(text) => {
                    self.phase = Phase::Streaming;
                    sink.on_delta(&text);
                }
                StreamChunk::Done { .. } => break,
            }
        }

        let result = sender
            .await
            .map_err(|_| AssistError::transport("stream task failed"))?;
        if let Err(err) = result {
            // Mid-stream failure: whatever already streamed stays visible;
            // a failure before the first delta leaves the answer empty.
            if !sink.answer().is_empty() {
                self.turn_mut(turn_id).answer = sink.answer().to_string();
            }
            self.stream_tx.send_replace(None);
            return Err(err);
        }

        let full = sink.answer().to_string();
        sink.on_complete(&full);

        // Clear the partial-stream state a beat after completion so the
        // final publish and the turn-list update do not visibly flicker.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.stream_tx.send_replace(None);
        Ok(full)
    }

    fn turn(&self, id: Uuid) -> &ChatTurn {
        self.turns
            .iter()
            .find(|t| t.id == id)
            .expect("active turn exists for the duration of ask")
    }

    fn turn_mut(&mut self, id: Uuid) -> &mut ChatTurn {
        self.turns
            .iter_mut()
            .find(|t| t.id == id)
            .expect("active turn exists for the duration of ask")
    }
}

/// Final request order: system prompt, trimmed prior turns (a
/// user/assistant pair each, oldest first), tool probe messages, the new
/// user message.
fn assemble_messages(
    system_prompt: &str,
    window: &[ChatTurn],
    tool_messages: Option<Vec<ChatMessage>>,
    user_message: ChatMessage,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    for turn in window {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.extend(tool_messages.unwrap_or_default());
    messages.push(user_message);
    messages
}

/// (tool name, arguments) pairs from the probe's assistant message.
fn trace_from(messages: &[ChatMessage]) -> Vec<(String, String)> {
    messages
        .first()
        .and_then(|m| m.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|c| (c.function.name.clone(), c.function.arguments.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn outcome_for(err: AssistError) -> AskOutcome {
    if err.is_rate_limited() {
        AskOutcome::RateLimited {
            message: "You've reached your API limit. Please upgrade to pay-as-you-go".to_string(),
        }
    } else {
        AskOutcome::Failed {
            message: err.to_string(),
        }
    }
}
