//! Tool invocation adapter.
//!
//! Routes "call this agent with this prompt" requests to one of several
//! backend kinds and normalizes their heterogeneous response shapes into
//! plain text. The backend is resolved once per call from the address
//! string into a closed [`BackendTarget`] variant rather than
//! string-sniffing at call sites.
//!
//! Address forms:
//! - `http(s)://host:port`: a capsule service's `/call_tool` endpoint
//! - `hf:<model>`: Hugging Face Inference API
//! - `cerebras:<model>`: Cerebras chat completions

pub mod cerebras;
pub mod hf;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::OrchestratorConfig;
use crate::domain::{Result, SkirmishError};

pub use cerebras::CerebrasClient;
pub use hf::HfClient;

/// Backend kind for one invocation, resolved from the address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    /// A capsule service reachable at this base URL.
    Capsule(String),
    /// Hugging Face Inference API, model identifier from the address.
    HostedHf { model: String },
    /// Cerebras chat completions, model identifier from the address.
    HostedCerebras { model: String },
}

impl BackendTarget {
    /// Parse an address string into its backend kind.
    pub fn resolve(address: &str) -> BackendTarget {
        if let Some(model) = address.strip_prefix("hf:") {
            BackendTarget::HostedHf {
                model: model.to_string(),
            }
        } else if let Some(model) = address.strip_prefix("cerebras:") {
            BackendTarget::HostedCerebras {
                model: model.to_string(),
            }
        } else {
            BackendTarget::Capsule(address.to_string())
        }
    }
}

/// Generation tunables forwarded from tool arguments to hosted backends.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

impl GenerationOptions {
    /// Pull recognised tunables out of a tool-argument object.
    pub fn from_arguments(arguments: &Value) -> Self {
        Self {
            temperature: arguments.get("temperature").and_then(Value::as_f64),
            max_tokens: arguments.get("max_tokens").and_then(Value::as_u64),
            top_p: arguments.get("top_p").and_then(Value::as_f64),
        }
    }
}

/// The seam between the battle runner and real backends. Tests inject a
/// deterministic stub; production wires [`HttpToolInvoker`].
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool` on the agent at `endpoint` and return normalized text.
    async fn invoke(
        &self,
        endpoint: Option<&str>,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String>;
}

/// Production invoker dispatching over HTTP to capsules and hosted APIs.
pub struct HttpToolInvoker {
    client: reqwest::Client,
    hf: HfClient,
    cerebras: CerebrasClient,
}

impl HttpToolInvoker {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            hf: HfClient::new(config),
            cerebras: CerebrasClient::new(config),
        }
    }

    /// `POST {url}/call_tool` with `{name, arguments}`; non-2xx is a
    /// backend failure, a non-JSON body is treated as raw text.
    async fn call_capsule(
        &self,
        url: &str,
        tool: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/call_tool", url.trim_end_matches('/')))
            .timeout(timeout)
            .json(&serde_json::json!({ "name": tool, "arguments": arguments }))
            .send()
            .await
            .map_err(|err| SkirmishError::backend(format!("capsule call failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SkirmishError::backend(format!("capsule body read failed: {err}")))?;

        if !status.is_success() {
            return Err(SkirmishError::backend_status(
                format!("capsule returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    fn prompt_from(arguments: &Value, tool: &str) -> Result<String> {
        arguments
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SkirmishError::Validation(format!(
                    "hosted backend invocation of '{tool}' requires a string 'prompt' argument"
                ))
            })
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(
        &self,
        endpoint: Option<&str>,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String> {
        let address = endpoint.ok_or_else(|| {
            SkirmishError::Configuration(format!("no backend endpoint for tool '{tool}'"))
        })?;

        let raw = match BackendTarget::resolve(address) {
            BackendTarget::Capsule(url) => {
                self.call_capsule(&url, tool, &arguments, timeout).await?
            }
            BackendTarget::HostedHf { model } => {
                let prompt = Self::prompt_from(&arguments, tool)?;
                let options = GenerationOptions::from_arguments(&arguments);
                Value::String(self.hf.generate(&model, &prompt, &options).await?)
            }
            BackendTarget::HostedCerebras { model } => {
                let prompt = Self::prompt_from(&arguments, tool)?;
                let options = GenerationOptions::from_arguments(&arguments);
                Value::String(self.cerebras.generate(&model, &prompt, &options).await?)
            }
        };

        Ok(normalize_tool_output(&raw))
    }
}

/// Flatten a backend response into plain text.
///
/// Strings pass through; arrays join each element's `text` field (falling
/// back to `generated_text`, then to the JSON form of the element);
/// objects yield their `text` field or their JSON form; everything else is
/// stringified.
pub fn normalize_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.get("text")
                    .or_else(|| item.get("generated_text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| item.to_string())
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
