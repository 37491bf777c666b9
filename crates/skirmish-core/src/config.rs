//! Process configuration, resolved from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Engine-wide settings with env-var defaults.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root data directory; run snapshots land under `<data_dir>/battles`.
    pub data_dir: PathBuf,

    /// Default attacker capsule endpoint when a run supplies none.
    pub default_attacker_endpoint: String,

    /// Default defender capsule endpoint when a run supplies none.
    pub default_defender_endpoint: String,

    /// Default tool names invoked on each side.
    pub default_attacker_tool: String,
    pub default_defender_tool: String,

    /// Per-call timeout for capsule tool invocations.
    pub invoke_timeout: Duration,

    /// Hugging Face Inference API settings.
    pub hf_api_key: Option<String>,
    pub hf_api_base: String,

    /// Cerebras chat-completions settings.
    pub cerebras_api_key: Option<String>,
    pub cerebras_api_base: String,
    pub cerebras_default_model: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_default().join("data"));

        Self {
            data_dir,
            default_attacker_endpoint: std::env::var("CAPSULE_ATTACKER_URL")
                .unwrap_or_else(|_| "http://attacker-demo:9000".to_string()),
            default_defender_endpoint: std::env::var("CAPSULE_DEFENDER_URL")
                .unwrap_or_else(|_| "http://defender-demo:9000".to_string()),
            default_attacker_tool: "generate_attack".to_string(),
            default_defender_tool: "evaluate_defense".to_string(),
            invoke_timeout: Duration::from_secs(15),
            hf_api_key: std::env::var("HF_API_KEY").ok(),
            hf_api_base: std::env::var("HF_API_URL")
                .unwrap_or_else(|_| "https://api-inference.huggingface.co/models".to_string()),
            cerebras_api_key: std::env::var("CEREBRAS_API_KEY").ok(),
            cerebras_api_base: std::env::var("CEREBRAS_API_URL")
                .unwrap_or_else(|_| "https://api.cerebras.ai/v1".to_string()),
            cerebras_default_model: std::env::var("CEREBRAS_DEFAULT_MODEL")
                .unwrap_or_else(|_| "llama-4-scout-17b-16e-instruct".to_string()),
        }
    }
}

impl OrchestratorConfig {
    /// Resolve configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Directory holding one JSON snapshot per run.
    pub fn battles_dir(&self) -> PathBuf {
        self.data_dir.join("battles")
    }
}
