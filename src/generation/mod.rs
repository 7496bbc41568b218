//! CK-009: Generation service — the only thing that talks to a model.
//!
//! Two backends: an OpenAI-compatible HTTP endpoint and a local command that
//! reads the prompt on stdin. Timeouts are applied by the caller.

pub mod command;
#[cfg(test)]
pub mod fake;
pub mod http;

pub use command::CommandGenerationService;
pub use http::HttpGenerationService;

use crate::core::config::{GenerationConfig, ProviderKind};
use async_trait::async_trait;
use std::time::Duration;

/// Model reply plus usage, when the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: Option<u64>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<Generation, String>;
}

/// One generation call bounded by `timeout`. Expiry is an ordinary error.
pub async fn generate_with_timeout(
    service: &dyn GenerationService,
    prompt: &str,
    timeout: Duration,
) -> Result<Generation, String> {
    match tokio::time::timeout(timeout, service.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(format!("generation timed out after {:?}", timeout)),
    }
}

/// Build the backend selected in config.
pub fn from_config(config: &GenerationConfig) -> Result<Box<dyn GenerationService>, String> {
    match config.provider {
        ProviderKind::Http => Ok(Box::new(HttpGenerationService::from_config(config)?)),
        ProviderKind::Command => Ok(Box::new(CommandGenerationService::from_config(config)?)),
    }
}
