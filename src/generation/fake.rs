//! Scripted generation service for tests.

use super::{Generation, GenerationService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Answer after a delay (exercise timeouts)
    Slow(Duration, String),
}

/// Answers with the first rule whose needle occurs in the prompt.
#[derive(Debug, Default)]
pub struct FakeGeneration {
    rules: Vec<(String, Reply)>,
    tokens: Option<u64>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, reply: Reply) -> Self {
        self.rules.push((needle.to_string(), reply));
        self
    }

    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.on(needle, Reply::Text(text.to_string()))
    }

    pub fn fail(self, needle: &str, error: &str) -> Self {
        self.on(needle, Reply::Fail(error.to_string()))
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Reply::Fail("no scripted reply".to_string()));

        let text = match reply {
            Reply::Text(text) => text,
            Reply::Fail(error) => return Err(error),
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
        };
        Ok(Generation {
            text,
            tokens_used: self.tokens,
        })
    }
}
