// src/llm/mod.rs
// LM provider trait - clean, provider-agnostic one-shot completion interface

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub mod extract;
pub mod openai;
pub mod schema;
pub mod scripted;

pub use extract::extract_first_json;
pub use openai::OpenAiCompatProvider;
pub use scripted::ScriptedProvider;

/// Chat roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Simple message format for all providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Token usage tracking across providers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Structured-response request
#[derive(Debug, Clone)]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        strict: bool,
        description: Option<String>,
    },
}

impl ResponseFormat {
    /// Wire shape for chat-completions style APIs.
    pub fn to_wire(&self) -> Value {
        match self {
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema { name, schema, strict, description } => {
                let mut inner = json!({
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                });
                if let Some(desc) = description {
                    inner["description"] = json!(desc);
                }
                json!({"type": "json_schema", "json_schema": inner})
            }
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop: Vec<String>,
    pub response_format: Option<ResponseFormat>,
    pub cancel: Option<CancellationToken>,
}

/// One completion result
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub raw: Option<Value>,
}

/// Universal one-shot chat completion interface.
///
/// Implementations must tolerate callers that request a schema the model
/// then ignores; the root loop's coercion is defensive.
#[async_trait]
pub trait LmProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_format_wire_shapes() {
        assert_eq!(ResponseFormat::JsonObject.to_wire(), json!({"type": "json_object"}));
        let wire = ResponseFormat::JsonSchema {
            name: "rlm_action".into(),
            schema: json!({"type": "object"}),
            strict: false,
            description: None,
        }
        .to_wire();
        assert_eq!(wire["type"], "json_schema");
        assert_eq!(wire["json_schema"]["name"], "rlm_action");
        assert!(wire["json_schema"].get("description").is_none());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage { input: 10, output: 5 });
        total.add(TokenUsage { input: 1, output: 2 });
        assert_eq!(total.input, 11);
        assert_eq!(total.output, 7);
    }
}
