//! Gemini `generateContent` backend
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::backend::GenerationBackend;
use crate::error::PlanError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_output_tokens: i32,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        let model = model.into();
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                model
            ),
            model,
            system_prompt: None,
            temperature: 0.3,
            max_output_tokens: 4096,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request(&self, prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: self.max_output_tokens,
            },
            system_instruction: self.system_prompt.as_ref().map(|text| SystemInstruction {
                parts: vec![Part { text: text.clone() }],
            }),
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PlanError::GenerationError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        info!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    PlanError::GenerationTimeout(timeout)
                } else {
                    PlanError::GenerationError(format!("Gemini API error: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(PlanError::GenerationError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            PlanError::GenerationError(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| PlanError::GenerationError("No response from Gemini API".to_string()))?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                warn!(finish_reason = reason, "Gemini response may be incomplete");
            }
        }

        let answer: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if answer.is_empty() {
            return Err(PlanError::GenerationError(
                "Empty response from Gemini".to_string(),
            ));
        }

        info!(chars = answer.len(), "Gemini response received");
        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let backend = GeminiBackend::new("key", DEFAULT_MODEL)
            .unwrap()
            .with_system_prompt("You are a strict reviewer");
        let json = serde_json::to_string(&backend.request("Score this plan")).unwrap();

        assert!(json.contains("Score this plan"));
        assert!(json.contains("system_instruction"));
        assert!(json.contains("max_output_tokens"));
    }

    #[test]
    fn test_system_instruction_omitted_when_unset() {
        let backend = GeminiBackend::new("key", DEFAULT_MODEL).unwrap();
        let json = serde_json::to_string(&backend.request("hi")).unwrap();
        assert!(!json.contains("system_instruction"));
        assert_eq!(backend.name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"accuracy_score\": 8}"}],"role":"model"},"finishReason":"STOP"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let backend = GeminiBackend::new("", DEFAULT_MODEL).unwrap();
        let result = backend.generate("prompt", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PlanError::GenerationError(_))));
    }
}
