//! Prompt Host - the prompt-action pipeline
//!
//! This crate drives a configurable prompt action end to end:
//! - Expand the action's template against live context sources
//! - Run an optional tool round-trip before the main completion
//! - Trim conversation history to the model's token budget
//! - Issue the chat request, streaming or whole-answer
//! - Persist the finished turn and its tool trace

pub mod actions;
pub mod attachments;
pub mod chat;
pub mod history;
pub mod models;
pub mod template;
pub mod token_window;
pub mod tools;

pub use chat::{AskOutcome, ChatSession, ChatSubscriptions, CompletionSink, Phase};
pub use template::{Rendered, TemplateEngine};
pub use token_window::TokenEstimator;
pub use tools::{Tool, ToolInvoker, ToolRegistry};
