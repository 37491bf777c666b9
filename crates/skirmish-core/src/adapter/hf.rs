//! Hugging Face Inference API client.
//!
//! Text-generation calls with bounded retries: timeouts, 429 (rate
//! limit), 503 (model loading), and other 5xx responses are retried with
//! exponential backoff; 401 is an authentication failure and surfaces
//! immediately. A missing API key fails before any network call.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::GenerationOptions;
use crate::config::OrchestratorConfig;
use crate::domain::{Result, SkirmishError};
use crate::retry::{default_classifier, retry_async, RetryPolicy};

const DEFAULT_MAX_NEW_TOKENS: u64 = 256;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.95;

/// Client for the hosted Hugging Face text-generation endpoint.
pub struct HfClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl HfClient {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.hf_api_base.trim_end_matches('/').to_string(),
            api_key: config.hf_api_key.clone(),
            policy: RetryPolicy::with_timeout(Duration::from_secs(60)),
        }
    }

    /// Generate text from `model` for `prompt`.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SkirmishError::Configuration("HF_API_KEY is not set in the environment".to_string())
        })?;

        let payload = serde_json::json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
                "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                "top_p": options.top_p.unwrap_or(DEFAULT_TOP_P),
                "do_sample": true,
                "return_full_text": false,
            },
        });

        debug!(event = "hf.call", model = %model, prompt_len = prompt.len());

        retry_async(&self.policy, default_classifier, || {
            self.call_once(api_key, model, &payload)
        })
        .await
    }

    async fn call_once(&self, api_key: &str, model: &str, payload: &Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/{model}", self.api_base))
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| SkirmishError::backend(format!("hf request failed: {err}")))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SkirmishError::Configuration(
                "invalid Hugging Face API key".to_string(),
            ));
        }
        if !status.is_success() {
            if status.as_u16() == 503 {
                warn!(event = "hf.model_loading", model = %model);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SkirmishError::backend_status(
                format!("hf returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| SkirmishError::backend(format!("hf response not json: {err}")))?;
        parse_response(&data)
    }
}

/// Different models answer in different shapes: a list of objects with
/// `generated_text`, a bare object, or a plain string.
fn parse_response(data: &Value) -> Result<String> {
    match data {
        Value::Array(items) => {
            let first = items
                .first()
                .ok_or_else(|| SkirmishError::backend("empty response from hf"))?;
            match first {
                Value::Object(map) => Ok(map
                    .get("generated_text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()),
                other => Ok(other.to_string()),
            }
        }
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                return Err(SkirmishError::backend(format!("hf api error: {error}")));
            }
            Ok(map
                .get("generated_text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string()))
        }
        Value::String(text) => Ok(text.clone()),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_list_shape() {
        let data = json!([{"generated_text": "out"}]);
        assert_eq!(parse_response(&data).unwrap(), "out");
    }

    #[test]
    fn test_parse_object_shape_and_error() {
        assert_eq!(
            parse_response(&json!({"generated_text": "out"})).unwrap(),
            "out"
        );
        assert!(parse_response(&json!({"error": "model overloaded"})).is_err());
    }

    #[test]
    fn test_parse_string_and_empty_list() {
        assert_eq!(parse_response(&json!("plain")).unwrap(), "plain");
        assert!(parse_response(&json!([])).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let config = OrchestratorConfig {
            hf_api_key: None,
            ..OrchestratorConfig::default()
        };
        let client = HfClient::new(&config);
        let result = client
            .generate("gpt2", "hi", &GenerationOptions::default())
            .await;
        assert!(matches!(result, Err(SkirmishError::Configuration(_))));
    }
}
