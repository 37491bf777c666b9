//! Cerebras chat-completions client.
//!
//! Two strategies tried in order against the same logical endpoint: a
//! typed request/response path first, then a raw JSON fallback that makes
//! no assumptions about the response schema. Each strategy carries its own
//! bounded retry with exponential backoff. A missing credential fails
//! before any network call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::GenerationOptions;
use crate::config::OrchestratorConfig;
use crate::domain::{Result, SkirmishError};
use crate::retry::{default_classifier, retry_async, RetryPolicy};

const DEFAULT_MAX_TOKENS: u64 = 256;
const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: u64,
    temperature: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the Cerebras chat-completions endpoint.
pub struct CerebrasClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    policy: RetryPolicy,
}

impl CerebrasClient {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.cerebras_api_base.trim_end_matches('/').to_string(),
            api_key: config.cerebras_api_key.clone(),
            default_model: config.cerebras_default_model.clone(),
            policy: RetryPolicy::with_timeout(Duration::from_secs(30)),
        }
    }

    /// Generate text from `model` (empty selects the configured default).
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SkirmishError::Configuration(
                "CEREBRAS_API_KEY is not set in the environment".to_string(),
            )
        })?;
        let model = if model.is_empty() {
            self.default_model.as_str()
        } else {
            model
        };

        // Typed path first; any failure falls back to the raw path.
        let typed = retry_async(&self.policy, default_classifier, || {
            self.call_typed(api_key, model, prompt, options)
        })
        .await;

        match typed {
            Ok(text) => {
                debug!(event = "cerebras.typed_success", model = %model, out_len = text.len());
                Ok(text)
            }
            Err(err) => {
                warn!(event = "cerebras.typed_failed_falling_back", model = %model, error = %err);
                let text = retry_async(&self.policy, default_classifier, || {
                    self.call_raw(api_key, model, prompt, options)
                })
                .await?;
                debug!(event = "cerebras.raw_success", model = %model, out_len = text.len());
                Ok(text)
            }
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    async fn call_typed(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_completion_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| SkirmishError::backend(format!("cerebras request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SkirmishError::backend_status(
                format!("cerebras returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| SkirmishError::backend(format!("cerebras response shape: {err}")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn call_raw(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": false,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| SkirmishError::backend(format!("cerebras request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SkirmishError::backend_status(
                format!("cerebras returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| SkirmishError::backend(format!("cerebras response not json: {err}")))?;
        Ok(data
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let config = OrchestratorConfig {
            cerebras_api_key: None,
            ..OrchestratorConfig::default()
        };
        let client = CerebrasClient::new(&config);
        let result = client
            .generate("", "hi", &GenerationOptions::default())
            .await;
        assert!(matches!(result, Err(SkirmishError::Configuration(_))));
    }

    #[test]
    fn test_typed_response_deserializes() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("hello")
        );
    }
}
