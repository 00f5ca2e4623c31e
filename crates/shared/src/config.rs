//! User preferences and persisted configuration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FieldError;

fn default_true() -> bool {
    true
}

/// Azure OpenAI needs a custom base URL plus an api-version query param and
/// an api-key header instead of a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureOptions {
    pub endpoint: String,
    pub deployment: String,
}

pub const AZURE_API_VERSION: &str = "2023-06-01-preview";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub api_key: String,
    /// Custom OpenAI-compatible endpoint, used when set and Azure is off.
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub azure: Option<AzureOptions>,
    #[serde(default = "default_true")]
    pub use_stream: bool,
    /// Speak finished answers aloud.
    #[serde(default)]
    pub auto_tts: bool,
    /// Skip writing finished turns to history.
    #[serde(default)]
    pub history_paused: bool,
    #[serde(default)]
    pub openweather_api_key: Option<String>,
}

impl Preferences {
    /// Base URL for chat requests. Azure endpoints embed the deployment path.
    pub fn config_url(&self) -> String {
        if let Some(azure) = &self.azure {
            return format!(
                "{}/openai/deployments/{}",
                azure.endpoint.trim_end_matches('/'),
                azure.deployment
            );
        }
        if let Some(endpoint) = &self.api_endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        "https://api.openai.com/v1".to_string()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: None,
            azure: None,
            use_stream: true,
            auto_tts: false,
            history_paused: false,
            openweather_api_key: None,
        }
    }
}

/// Reserved id of the built-in model configuration. It cannot be deleted,
/// only reset to its defaults.
pub const DEFAULT_MODEL_ID: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    /// System prompt sent with every request.
    pub prompt: String,
    /// Provider model identifier, e.g. "gpt-4o-mini".
    pub option: String,
    /// Stored as entered in the form; see [`ModelConfig::temperature_value`].
    pub temperature: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub vision: bool,
    /// Tool names this model may call during the probe round-trip.
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelConfig {
    pub fn builtin_default() -> Self {
        let now = Utc::now();
        Self {
            id: DEFAULT_MODEL_ID.to_string(),
            name: "Default".to_string(),
            prompt: "You are a helpful assistant.".to_string(),
            option: "gpt-3.5-turbo".to_string(),
            temperature: "0.8".to_string(),
            pinned: false,
            vision: false,
            enabled_tools: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.id == DEFAULT_MODEL_ID
    }

    pub fn temperature_value(&self) -> f32 {
        self.temperature.parse().unwrap_or(0.8)
    }

    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        }
        if self.option.trim().is_empty() {
            errors.push(FieldError::new("option", "Model option is required"));
        }
        match self.temperature.parse::<f32>() {
            Ok(t) if (0.0..=2.0).contains(&t) => {}
            _ => errors.push(FieldError::new(
                "temperature",
                "Temperature must be a number between 0 and 2",
            )),
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A user-defined prompt action bound to a model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    /// Prompt template with `{{...}}` placeholders.
    pub prompt: String,
    pub model_id: String,
    /// At most one action in a collection holds this flag.
    #[serde(default)]
    pub default: bool,
    /// Render the answer as a diff against the resolved source text.
    #[serde(default)]
    pub show_diff: bool,
}

impl Action {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "Title is required"));
        }
        if self.prompt.trim().is_empty() {
            errors.push(FieldError::new("prompt", "Prompt is required"));
        } else if !self.prompt.contains("{{") {
            errors.push(FieldError::new("prompt", "Need set dynamic tag"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_url_default() {
        let prefs = Preferences::default();
        assert_eq!(prefs.config_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_config_url_custom_endpoint() {
        let prefs = Preferences {
            api_endpoint: Some("https://proxy.example.com/v1/".into()),
            ..Preferences::default()
        };
        assert_eq!(prefs.config_url(), "https://proxy.example.com/v1");
    }

    #[test]
    fn test_config_url_azure() {
        let prefs = Preferences {
            azure: Some(AzureOptions {
                endpoint: "https://corp.openai.azure.com".into(),
                deployment: "gpt4".into(),
            }),
            ..Preferences::default()
        };
        assert_eq!(
            prefs.config_url(),
            "https://corp.openai.azure.com/openai/deployments/gpt4"
        );
    }

    #[test]
    fn test_action_needs_placeholder() {
        let action = Action {
            id: "1".into(),
            title: "Summarize".into(),
            description: String::new(),
            icon: "Paragraph".into(),
            prompt: "Summarize this text".into(),
            model_id: DEFAULT_MODEL_ID.into(),
            default: false,
            show_diff: false,
        };
        let errors = action.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "prompt"));
    }

    #[test]
    fn test_temperature_range() {
        let mut model = ModelConfig::builtin_default();
        model.temperature = "7".into();
        assert!(model.validate().is_err());
        model.temperature = "1.2".into();
        assert!(model.validate().is_ok());
    }
}
