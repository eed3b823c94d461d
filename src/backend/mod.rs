//! Generative backends
//!
//! Drafting and evaluation both go through `GenerationBackend`, so either
//! role can be served by Gemini, a local Ollama model, or a scripted
//! backend in tests.

use crate::error::PlanError;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub mod gemini;
pub mod ollama;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;

/// Text-in, text-out model endpoint
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Identity recorded in evaluation metadata
    fn name(&self) -> &str;

    /// Generate a completion. `timeout` is advisory for transport-level
    /// limits; callers enforce it with `generate_within`.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Run one generation bounded by `limit`. Expiry yields `GenerationTimeout`;
/// an empty completion is a `GenerationError`.
pub async fn generate_within(
    backend: &dyn GenerationBackend,
    prompt: &str,
    limit: Duration,
) -> Result<String> {
    let text = match tokio::time::timeout(limit, backend.generate(prompt, limit)).await {
        Ok(result) => result?,
        Err(_) => return Err(PlanError::GenerationTimeout(limit)),
    };

    if text.trim().is_empty() {
        return Err(PlanError::GenerationError(format!(
            "{} returned an empty completion",
            backend.name()
        )));
    }

    debug!(backend = backend.name(), chars = text.len(), "Generation complete");
    Ok(text)
}

//
// ================= Scripted Backend =================
//

/// One canned reaction of a `ScriptedBackend`
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    /// Never answers within any reasonable timeout
    Stall,
}

/// Replays canned replies in order. Used offline and in tests.
pub struct ScriptedBackend {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    repeat_last: bool,
    last: Mutex<Option<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            repeat_last: false,
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.replies.get_mut().push_back(ScriptedReply::Text(text.into()));
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.replies.get_mut().push_back(ScriptedReply::Fail(message.into()));
        self
    }

    pub fn stall(mut self) -> Self {
        self.replies.get_mut().push_back(ScriptedReply::Stall);
        self
    }

    /// Keep serving the final reply once the script runs out
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub async fn calls(&self) -> usize {
        self.prompts.lock().await.len()
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    async fn next_reply(&self) -> Option<ScriptedReply> {
        let mut replies = self.replies.lock().await;
        let mut last = self.last.lock().await;

        match replies.pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                Some(reply)
            }
            None if self.repeat_last => last.clone(),
            None => None,
        }
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());

        match self.next_reply().await {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(PlanError::GenerationError(message)),
            Some(ScriptedReply::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PlanError::GenerationError("stalled".to_string()))
            }
            None => Err(PlanError::GenerationError(format!(
                "{}: script exhausted",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let backend = ScriptedBackend::new("script").reply("first").fail("down");

        let first = generate_within(&backend, "p1", Duration::from_secs(1)).await;
        assert_eq!(first.unwrap(), "first");

        let second = generate_within(&backend, "p2", Duration::from_secs(1)).await;
        assert!(matches!(second, Err(PlanError::GenerationError(_))));

        let third = generate_within(&backend, "p3", Duration::from_secs(1)).await;
        assert!(third.is_err());
        assert_eq!(backend.calls().await, 3);
    }

    #[tokio::test]
    async fn test_stall_times_out() {
        let backend = ScriptedBackend::new("slow").stall();
        let limit = Duration::from_millis(20);

        let result = generate_within(&backend, "prompt", limit).await;
        assert!(matches!(result, Err(PlanError::GenerationTimeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let backend = ScriptedBackend::new("blank").reply("   ");
        let result = generate_within(&backend, "prompt", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PlanError::GenerationError(_))));
    }

    #[test]
    fn test_repeating_serves_last_reply() {
        let backend = ScriptedBackend::new("loop").reply("same").repeating();
        tokio_test::block_on(async {
            for _ in 0..3 {
                let text = backend.generate("p", Duration::from_secs(1)).await.unwrap();
                assert_eq!(text, "same");
            }
        });
    }
}
