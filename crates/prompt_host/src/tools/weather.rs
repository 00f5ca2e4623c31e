//! Current-weather lookup via OpenWeatherMap.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use shared::chat_api::ToolDefinition;
use shared::error::AssistError;

use super::Tool;

pub struct WeatherTool {
    http: Client,
    api_key: Option<String>,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
        }
    }

    async fn lookup(&self, api_key: &str, location: &str) -> anyhow::Result<String> {
        let url = format!(
            "https://api.openweathermap.org/data/2.5/weather?q={}&appid={}",
            urlencoding::encode(location),
            api_key
        );
        let data: serde_json::Value = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let kelvin = data["main"]["temp"]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("no temperature in response"))?;
        let celsius = kelvin - 273.15;
        let description = data["weather"][0]["description"]
            .as_str()
            .unwrap_or("unknown");
        Ok(format!(
            "The weather in {} is {:.1}°C, weather description is {}",
            location, celsius, description
        ))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_current_weather".to_string(),
            description: "Get the current weather in a given location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state english name, e.g. San Francisco, anhui"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, AssistError> {
        // The key is mandatory: without it the tool fails fast instead of
        // answering with stale-looking output.
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AssistError::missing("OpenWeatherMap API key"))?
            .to_string();

        let location = input
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match self.lookup(&api_key, location).await {
            Ok(line) => Ok(line),
            Err(e) => {
                tracing::warn!(location, error = %e, "weather lookup failed");
                Ok("No data".to_string())
            }
        }
    }
}
