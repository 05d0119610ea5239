// src/llm/openai.rs
// Chat-completions provider for any OpenAI-compatible endpoint

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChatMessage, Completion, CompletionOptions, LmProvider, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    request_timeout: Duration,
    max_retries: u32,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 0,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Retry 429/5xx responses up to `retries` times with exponential backoff.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    fn build_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if !options.stop.is_empty() {
            body["stop"] = json!(options.stop);
        }
        if let Some(format) = &options.response_format {
            body["response_format"] = format.to_wire();
        }
        body
    }

    async fn send_once(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completions error {}: {}", status, error_text));
        }
        Ok(response.json::<Value>().await?)
    }

    fn is_retryable(error: &anyhow::Error) -> bool {
        let text = error.to_string();
        text.contains("429") || text.contains("500") || text.contains("502") || text.contains("503")
    }
}

#[async_trait]
impl LmProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion> {
        let body = self.build_body(messages, options);
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let mut attempt = 0;
        let raw = loop {
            let request = self.send_once(&body);
            let result = match &options.cancel {
                Some(cancel) => tokio::select! {
                    result = request => result,
                    _ = cancel.cancelled() => Err(anyhow!("chat completion cancelled")),
                },
                None => request.await,
            };
            match result {
                Ok(raw) => break raw,
                Err(error) if attempt < self.max_retries && Self::is_retryable(&error) => {
                    attempt += 1;
                    let delay = Duration::from_millis(500 * (1 << attempt.min(4)));
                    warn!(attempt, %error, "retrying chat completion in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        };

        let text = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("no message content in chat completion response"))?
            .to_string();

        let usage = raw.get("usage").map(|u| TokenUsage {
            input: u["prompt_tokens"].as_u64().unwrap_or(0),
            output: u["completion_tokens"].as_u64().unwrap_or(0),
        });

        Ok(Completion { text, usage, raw: Some(raw) })
    }
}
