//! Prompt source adapter.
//!
//! Prompt synthesis itself is an external collaborator; the orchestrator
//! only needs one attempt at a time and does its own bounded retries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Seam to whatever produces prompt text
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Generate one prompt for the given scene theme
    async fn generate(&self, theme: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct PromptEnvelope {
    prompts: Vec<String>,
}

/// Ollama-style HTTP prompt source
pub struct OllamaPrompter {
    api_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaPrompter {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_text(&self, theme: &str) -> String {
        format!(
            "Generate ONE single-line, highly detailed cinematic prompt for an AI \
             render of the scene theme '{theme}'. NO commentary. Respond ONLY with a \
             valid JSON object: {{\"prompts\": [\"<your prompt here>\"]}}"
        )
    }

    /// Models wrap the JSON in prose more often than not; take the outermost
    /// brace pair and parse that.
    fn extract_prompt(raw: &str) -> Result<String> {
        let start = raw.find('{').context("no JSON object in response")?;
        let end = raw.rfind('}').context("no JSON object in response")?;
        if start >= end {
            anyhow::bail!("malformed JSON brackets in response");
        }

        let envelope: PromptEnvelope = serde_json::from_str(&raw[start..=end])
            .context("response JSON missing 'prompts' list")?;

        let prompt = envelope
            .prompts
            .first()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .context("empty prompt string in response")?;

        Ok(prompt)
    }
}

#[async_trait]
impl PromptSource for OllamaPrompter {
    async fn generate(&self, theme: &str) -> Result<String> {
        debug!(%theme, model = %self.model, "Requesting prompt");

        let response = self
            .client
            .post(&self.api_url)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": self.request_text(theme),
                "stream": false,
            }))
            .send()
            .await
            .context("Failed to reach prompt source")?
            .error_for_status()
            .context("Prompt source returned an error status")?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse prompt source response")?;

        Self::extract_prompt(&body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_clean_json() {
        let raw = r#"{"prompts": ["a dancer under neon rain"]}"#;
        assert_eq!(
            OllamaPrompter::extract_prompt(raw).unwrap(),
            "a dancer under neon rain"
        );
    }

    #[test]
    fn test_extract_with_surrounding_prose() {
        let raw = "Sure! Here you go:\n{\"prompts\": [\" low angle shot \"]}\nEnjoy.";
        assert_eq!(
            OllamaPrompter::extract_prompt(raw).unwrap(),
            "low angle shot"
        );
    }

    #[test]
    fn test_extract_rejects_empty_prompt() {
        let raw = r#"{"prompts": [""]}"#;
        assert!(OllamaPrompter::extract_prompt(raw).is_err());
    }

    #[test]
    fn test_extract_rejects_missing_braces() {
        assert!(OllamaPrompter::extract_prompt("no json here").is_err());
    }
}
