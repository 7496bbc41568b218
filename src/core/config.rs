//! CK-012: chunkforge.yaml parsing and validation.
//!
//! Structural checks only: version must be "1.0", the selected provider must
//! be fully specified, timeouts must be positive.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Written by `chunkforge init`.
pub const CONFIG_TEMPLATE: &str = r#"version: "1.0"
state_dir: state

generation:
  # http: OpenAI-compatible chat completions endpoint
  # command: spawn `command`, prompt on stdin, reply on stdout
  provider: http
  base_url: https://api.openai.com/v1
  model: gpt-4o-mini
  api_key_env: OPENAI_API_KEY
  max_tokens: 16000
  temperature: 0.2

pipeline:
  timeout_secs: 1800
  pacing_ms: 2000
  mock_record_target: 20
  events: true
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkforgeConfig {
    pub version: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for ChunkforgeConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            state_dir: default_state_dir(),
            generation: GenerationConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Http,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,

    /// Name of the environment variable holding the bearer token
    pub api_key_env: String,

    pub max_tokens: u32,
    pub temperature: f32,

    /// argv for the command provider
    pub command: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Http,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 16000,
            temperature: 0.2,
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Per-call generation timeout
    pub timeout_secs: u64,

    /// Delay between consecutive generation calls during a full run
    pub pacing_ms: u64,

    /// Hint passed to the planner for seed-data volume
    pub mock_record_target: u32,

    /// Write the JSONL provenance log
    pub events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            pacing_ms: 2000,
            mock_record_target: 20,
            events: true,
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError {
        message: message.into(),
    }
}

/// Parse a chunkforge.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<ChunkforgeConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a chunkforge.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<ChunkforgeConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ChunkforgeConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(invalid(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.state_dir.as_os_str().is_empty() {
        errors.push(invalid("state_dir must not be empty"));
    }

    let generation = &config.generation;
    match generation.provider {
        ProviderKind::Http => {
            if !(generation.base_url.starts_with("http://")
                || generation.base_url.starts_with("https://"))
            {
                errors.push(invalid(format!(
                    "generation.base_url must be an http(s) URL, got \"{}\"",
                    generation.base_url
                )));
            }
            if generation.model.trim().is_empty() {
                errors.push(invalid("generation.model must not be empty"));
            }
            if generation.api_key_env.trim().is_empty() {
                errors.push(invalid("generation.api_key_env must not be empty"));
            }
        }
        ProviderKind::Command => {
            if generation.command.first().is_none_or(|c| c.trim().is_empty()) {
                errors.push(invalid(
                    "generation.command must name a program when provider is 'command'",
                ));
            }
        }
    }

    if generation.max_tokens == 0 {
        errors.push(invalid("generation.max_tokens must be positive"));
    }
    if !(0.0..=2.0).contains(&generation.temperature) {
        errors.push(invalid(format!(
            "generation.temperature must be within 0.0..=2.0, got {}",
            generation.temperature
        )));
    }

    if config.pipeline.timeout_secs == 0 {
        errors.push(invalid("pipeline.timeout_secs must be positive"));
    }
    if config.pipeline.mock_record_target == 0 {
        errors.push(invalid("pipeline.mock_record_target must be positive"));
    }

    errors
}
