//! OpenAI-compatible backend.
//!
//! Speaks the `/chat/completions`, `/completions` and `/embeddings` routes,
//! so it works against OpenAI and any server that mirrors them (OpenRouter,
//! Ollama, vLLM, llama.cpp server).
//!
//! This layer only classifies failures. Whether a failure is retried is
//! the gateway's call.

use std::time::Duration;

use async_trait::async_trait;
use ironloop_core::error::ProviderError;
use ironloop_core::message::{Message, Role};
use ironloop_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, TextCompletionRequest, Usage,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Seconds to wait when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// api.openai.com with `api_key`.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `route` and decode the JSON reply.
    async fn call<T: DeserializeOwned>(&self, route: &str, body: Value) -> Result<T, ProviderError> {
        let url = format!("{}/{route}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, retry_after, body);
            warn!(provider = %self.name, route, status, error = %error, "Backend refused request");
            return Err(error);
        }

        response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: status,
            message: format!("Failed to decode {route} response: {e}"),
        })
    }
}

/// Map an unsuccessful HTTP status onto the provider error taxonomy.
///
/// 429 becomes `RateLimited` and 401/403 `AuthenticationFailed`. A 404
/// usually means the model name is wrong. Anything else stays an
/// `ApiError` carrying its status, which the gateway checks against
/// `retry.retry_on_status`.
pub fn classify_status(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into()),
        404 => ProviderError::ModelNotFound(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
        .collect()
}

fn with_max_tokens(mut body: Value, max_tokens: Option<u32>) -> Value {
    if let Some(max_tokens) = max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, messages = request.messages.len(), "Chat request");
        let body = with_max_tokens(
            json!({
                "model": request.model,
                "messages": chat_messages(&request.messages),
                "temperature": request.temperature,
            }),
            request.max_tokens,
        );

        let reply: Completion<ChatChoice> = self.call("chat/completions", body).await?;
        let (choice, usage, model) = reply.into_first()?;
        Ok(ProviderResponse {
            message: Message::new(Role::Assistant, choice.message.content.unwrap_or_default()),
            usage,
            model,
        })
    }

    async fn complete_text(&self, request: TextCompletionRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Text completion request");
        let body = with_max_tokens(
            json!({
                "model": request.model,
                "prompt": request.prompt,
                "temperature": request.temperature,
            }),
            request.max_tokens,
        );

        let reply: Completion<TextChoice> = self.call("completions", body).await?;
        let (choice, usage, model) = reply.into_first()?;
        Ok(ProviderResponse {
            message: Message::assistant(choice.text),
            usage,
            model,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, inputs = request.inputs.len(), "Embedding request");
        let body = json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        let reply: Embeddings = self.call("embeddings", body).await?;
        Ok(EmbeddingResponse {
            embeddings: reply.data.into_iter().map(|d| d.embedding).collect(),
            model: reply.model,
            usage: reply.usage.map(Usage::from),
        })
    }
}

// --- Wire types ---

/// The envelope shared by chat and text completions.
#[derive(Debug, Deserialize)]
struct Completion<C> {
    model: String,
    choices: Vec<C>,
    usage: Option<WireUsage>,
}

impl<C> Completion<C> {
    fn into_first(self) -> Result<(C, Option<Usage>, String), ProviderError> {
        let choice = self.choices.into_iter().next().ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;
        Ok((choice, self.usage.map(Usage::from), self.model))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Embeddings {
    data: Vec<EmbeddingRow>,
    model: String,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// Embedding replies omit `completion_tokens`.
#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
