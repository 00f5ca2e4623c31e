//! Failure taxonomy for the prompt pipeline.
//!
//! Context and configuration failures abort an action end-to-end; transport
//! failures are classified for user-facing messaging; tool execution
//! failures are absorbed by the invoker and never surface here.

use thiserror::Error;

/// A per-field validation problem reported by a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AssistError {
    /// A required context source could not be read (no selection, no
    /// browser capability, ...).
    #[error("{source_name} is not available")]
    ContextUnavailable { source_name: String },

    /// A tool or the provider needs a credential that is absent.
    #[error("{name} is not configured")]
    ConfigurationMissing { name: String },

    /// Provider refused the request with a rate-limit response.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// Network or provider failure other than rate limiting.
    #[error("request failed: {detail}")]
    Transport { detail: String },

    /// A tool's executor failed. The invoker downgrades this to textual
    /// tool output; it only propagates when explicitly re-raised.
    #[error("tool {name} failed: {detail}")]
    ToolFailed { name: String, detail: String },

    /// Form input failed a client-side rule; never reaches the orchestrator.
    #[error("validation failed")]
    Validation(Vec<FieldError>),
}

impl AssistError {
    pub fn context(source_name: impl Into<String>) -> Self {
        Self::ContextUnavailable {
            source_name: source_name.into(),
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self::ConfigurationMissing { name: name.into() }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Classify a provider-side failure, separating rate limits for messaging.
///
/// Some gateways hide the real status behind a 200-with-error-body or a
/// generic 5xx, so the body is also scanned for an embedded 429 marker.
pub fn classify_transport(status: Option<u16>, detail: &str) -> AssistError {
    if status == Some(429) || detail.contains("429") {
        AssistError::RateLimited {
            detail: detail.to_string(),
        }
    } else {
        AssistError::Transport {
            detail: detail.to_string(),
        }
    }
}
