//! OpenAI-compatible chat completion client

use super::Summarizer;
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summarization provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Base URL up to, not including, `/chat/completions`
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: crate::env_or("SIEVE_LLM_BASE_URL", "https://api.groq.com/openai/v1"),
            api_key: std::env::var("GROQ_API_KEY").unwrap_or_default(),
            model: crate::env_or("SIEVE_LLM_MODEL", "openai/gpt-oss-120b"),
            temperature: 0.7,
            timeout_secs: std::env::var("SIEVE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct ChatCompletionClient {
    config: SummarizerConfig,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(config: SummarizerConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Summarizer for ChatCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> CoreResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            stream: false,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::SummarizationUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::SummarizationUnavailable(format!(
                "{} - {}",
                status.as_u16(),
                body
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::SummarizationUnavailable(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CoreError::SummarizationUnavailable("empty completion".to_string()))
    }
}
