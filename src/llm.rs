//! Chat-completion providers.
//!
//! An [`LlmProvider`] turns one [`Prompt`] into one answer string with a
//! single upstream request. Retrying on throttling is done by
//! [`complete_with_retry`], so the same policy applies to every backend.
//!
//! | provider   | endpoint                     | key               |
//! |------------|------------------------------|-------------------|
//! | `cohere`   | `POST {url}/v2/chat`         | `COHERE_API_KEY`  |
//! | `openai`   | `POST {url}/chat/completions`| `OPENAI_API_KEY`  |
//! | `disabled` | none                         | none              |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use travel_guide_core::prompt::Prompt;
use travel_guide_core::retry::{retry_with_backoff, ProviderError, RetryPolicy};

use crate::config::LlmConfig;
use crate::http;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Send `prompt` and return the generated text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "cohere" => Ok(Arc::new(CohereChat::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub async fn complete_with_retry(
    llm: &dyn LlmProvider,
    policy: &RetryPolicy,
    prompt: &Prompt,
) -> Result<String, ProviderError> {
    retry_with_backoff(policy, tokio::time::sleep, move |attempt| async move {
        let result = llm.complete(prompt).await;
        if let Err(ProviderError::RateLimited(msg)) = &result {
            warn!(attempt, provider = llm.name(), "completion rate limited: {}", msg);
        }
        result
    })
    .await
}

/// Chat messages in the shape both Cohere v2 and OpenAI accept.
fn chat_messages(prompt: &Prompt) -> Vec<Value> {
    let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
    if !prompt.system.is_empty() {
        messages.push(json!({ "role": "system", "content": prompt.system }));
    }
    for m in &prompt.messages {
        messages.push(json!({ "role": m.role.as_str(), "content": m.content }));
    }
    messages
}

fn require_model(config: &LlmConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for {} provider", config.provider))
}

// ============ Disabled ============

pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        Err(ProviderError::Failed(
            "LLM provider is disabled; set [llm] provider in the config".to_string(),
        ))
    }
}

// ============ Cohere ============

const COHERE_URL: &str = "https://api.cohere.com";

pub struct CohereChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl CohereChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| COHERE_URL.to_string()),
            api_key: http::api_key("COHERE_API_KEY")?,
            model: require_model(config)?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for CohereChat {
    fn name(&self) -> &str {
        "cohere"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(prompt),
        });
        if let (Some(obj), Some(t)) = (body.as_object_mut(), self.temperature) {
            obj.insert("temperature".to_string(), json!(t));
        }

        let request = self
            .client
            .post(format!("{}/v2/chat", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);

        let payload = http::post_json(request, "Cohere").await?;
        parse_cohere_chat(&payload)
    }
}

/// Concatenate the text parts of `message.content[]`.
fn parse_cohere_chat(payload: &Value) -> Result<String, ProviderError> {
    let parts = payload["message"]["content"].as_array().ok_or_else(|| {
        ProviderError::Failed("Invalid Cohere chat response: missing message.content".to_string())
    })?;
    let text: String = parts
        .iter()
        .filter(|p| p["type"].as_str().unwrap_or("text") == "text")
        .filter_map(|p| p["text"].as_str())
        .collect();
    Ok(text)
}

// ============ OpenAI-compatible ============

const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Any `/chat/completions` endpoint: OpenAI, LM Studio, vLLM, a local gateway.
pub struct OpenAIChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // Local OpenAI-compatible servers run without a key.
        let api_key = match &config.url {
            Some(_) => http::api_key("OPENAI_API_KEY").ok(),
            None => Some(http::api_key("OPENAI_API_KEY")?),
        };
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            model: require_model(config)?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAIChat {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(prompt),
            "stream": false,
        });
        if let (Some(obj), Some(t)) = (body.as_object_mut(), self.temperature) {
            obj.insert("temperature".to_string(), json!(t));
        }

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let payload = http::post_json(request, "OpenAI").await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::Failed("Invalid chat response: missing choices[0].message.content".to_string())
            })
    }
}
