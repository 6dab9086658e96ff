//! Generation collaborator: one chat completion per call.
//!
//! [`ChatCompletionsGenerator`] speaks the OpenAI-compatible
//! `/chat/completions` protocol, which covers OpenAI, Groq and Ollama's
//! `/v1` endpoint. The context block is appended to the system message;
//! the user message carries the question unchanged.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::error::{RagError, RagResult};
use crate::http;

/// The result of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The assistant message text, when the response carried one.
    pub answer: Option<String>,
    /// The full response body.
    pub raw: String,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            answer: Some(text.clone()),
            raw: text,
        }
    }

    /// The answer, or the raw response when no answer field was found.
    pub fn into_text(self) -> String {
        self.answer.unwrap_or(self.raw)
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str, context: &str) -> Result<Completion>;
}

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig) -> RagResult<Self> {
        let api_key = match config.api_key_var() {
            Some(var) => Some(std::env::var(&var).map_err(|_| {
                RagError::config(format!("{} environment variable not set", var))
            })?),
            None => None,
        };
        let client = http::build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url().trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str, context: &str) -> Result<Completion> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system_message(system, context) },
                { "role": "user", "content": user },
            ],
        });
        let response = http::post_json_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            "chat completions",
        )
        .await?;
        Ok(parse_completion(&response))
    }
}

fn system_message(system: &str, context: &str) -> String {
    if context.trim().is_empty() {
        system.to_string()
    } else {
        format!("{}\n\nContext:\n{}", system, context)
    }
}

fn parse_completion(response: &Value) -> Completion {
    let answer = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string);
    Completion {
        answer,
        raw: response.to_string(),
    }
}
