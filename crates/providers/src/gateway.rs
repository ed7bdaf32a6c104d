//! Model gateway: the one call surface the agent uses to reach a model.
//!
//! Wraps a [`Provider`] with plugin short-circuiting, retry with
//! exponential backoff, usage metering and response hooks. Backoff sleeps
//! the calling task only.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ironloop_config::{AppConfig, LlmConfig, RetryConfig};
use ironloop_core::error::{Error, ProviderError, Result};
use ironloop_core::message::Message;
use ironloop_core::plugin::PluginBus;
use ironloop_core::provider::{EmbeddingRequest, Provider, ProviderRequest, TextCompletionRequest, Usage};
use ironloop_core::token;
use ironloop_telemetry::BudgetMeter;
use tracing::{debug, warn};

const PAID_ACCOUNT_WARNING: &str = "Please double check that you have set up a PAID OpenAI API account. \
Free-tier keys are rate limited too aggressively for an autonomous agent.";

/// Uniform access to chat, text and embedding models.
pub struct ModelGateway {
    provider: Arc<dyn Provider>,
    plugins: Arc<PluginBus>,
    meter: Arc<BudgetMeter>,
    retry: RetryConfig,
    llm: LlmConfig,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn Provider>, meter: Arc<BudgetMeter>, config: &AppConfig) -> Self {
        Self {
            provider,
            plugins: Arc::new(PluginBus::new()),
            meter,
            retry: config.retry.clone(),
            llm: config.llm.clone(),
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginBus>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn meter(&self) -> &BudgetMeter {
        &self.meter
    }

    pub fn plugins(&self) -> &PluginBus {
        &self.plugins
    }

    pub fn llm(&self) -> &LlmConfig {
        &self.llm
    }

    /// Ask a chat model for the next message.
    ///
    /// A plugin may answer instead of the backend; such answers are not
    /// metered. Every reply passes through the `on_response` hooks.
    pub async fn chat_completion(
        &self,
        messages: Vec<Message>,
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let request = ProviderRequest {
            model: model.to_string(),
            messages,
            temperature: temperature.unwrap_or(self.llm.temperature),
            max_tokens,
        };
        debug!(
            model = %request.model,
            temperature = request.temperature,
            max_tokens = ?request.max_tokens,
            messages = request.messages.len(),
            "Creating chat completion"
        );

        if let Some(text) = self.plugins.chat_completion(&request).await {
            return Ok(text);
        }

        let response = self.with_retry(move || self.provider.complete(request.clone())).await?;
        self.record(response.usage, &response.model)?;

        Ok(self.plugins.on_response(response.message.content))
    }

    /// Prompt-in, text-out completion. Defaults to the fast model.
    pub async fn text_completion(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let request = TextCompletionRequest {
            model: model.unwrap_or(&self.llm.fast_model).to_string(),
            prompt: prompt.to_string(),
            temperature: temperature.unwrap_or(self.llm.temperature),
            max_tokens,
        };

        let response = self.with_retry(move || self.provider.complete_text(request.clone())).await?;
        self.record(response.usage, &response.model)?;
        Ok(response.message.content)
    }

    /// Embed `text` with the configured embedding model.
    ///
    /// Text longer than the model's limit is split into chunks that are
    /// embedded separately, averaged weighted by chunk length, and scaled
    /// to unit length.
    pub async fn embedding(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.replace('\n', " ");
        let mut chunks = token::chunk_by_tokens(&text, self.llm.embedding_token_limit);
        if chunks.is_empty() {
            chunks.push("");
        }

        let mut weighted: Vec<f64> = Vec::new();
        let mut total_weight = 0.0;
        for chunk in chunks {
            let request = EmbeddingRequest {
                model: self.llm.embedding_model.clone(),
                inputs: vec![chunk.to_string()],
            };
            let response = self.with_retry(move || self.provider.embed(request.clone())).await?;
            self.record(response.usage, &self.llm.embedding_model)?;

            let vector = response
                .embeddings
                .into_iter()
                .next()
                .ok_or_else(|| Error::Internal("embedding response contained no vectors".into()))?;
            let weight = token::count_string_tokens(chunk).max(1) as f64;
            if weighted.is_empty() {
                weighted = vec![0.0; vector.len()];
            }
            if weighted.len() != vector.len() {
                return Err(Error::Internal(format!(
                    "embedding dimension changed between chunks ({} vs {})",
                    weighted.len(),
                    vector.len()
                )));
            }
            for (acc, v) in weighted.iter_mut().zip(&vector) {
                *acc += f64::from(*v) * weight;
            }
            total_weight += weight;
        }

        for v in weighted.iter_mut() {
            *v /= total_weight;
        }
        let norm = weighted.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in weighted.iter_mut() {
                *v /= norm;
            }
        }
        Ok(weighted.into_iter().map(|v| v as f32).collect())
    }

    /// Have the model play a function: describe it, pass the arguments,
    /// and take the reply as its return value.
    pub async fn call_ai_function(
        &self,
        function: &str,
        args: &[String],
        description: &str,
        model: Option<&str>,
    ) -> Result<String> {
        let messages = vec![
            Message::system(format!(
                "You are now the following python function: ```# {description}\n{function}```\n\nOnly respond with your `return` value."
            )),
            Message::user(args.join(", ")),
        ];
        let model = model.unwrap_or(&self.llm.smart_model).to_string();
        self.chat_completion(messages, &model, Some(0.0), None).await
    }

    /// Run `call` with the retry policy.
    ///
    /// Rate limits are always retried; API errors only when their status is
    /// in `retry_on_status`. The wait after attempt `n` is
    /// `backoff_base ^ (n + 2)` seconds.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let attempts = self.retry.num_retries + 1;
        let mut user_warned = !self.retry.warn_user;
        let mut attempt = 1;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retryable = match &err {
                ProviderError::RateLimited { .. } => {
                    debug!(attempt, "Reached rate limit");
                    if !user_warned {
                        warn!("{PAID_ACCOUNT_WARNING}");
                        user_warned = true;
                    }
                    true
                }
                ProviderError::ApiError { status_code, .. } => {
                    debug!(attempt, status = status_code, "API error");
                    self.retry.retry_on_status.contains(status_code)
                }
                _ => false,
            };
            if !retryable {
                return Err(Error::Provider(err));
            }

            if attempt >= attempts {
                warn!(attempts, error = %err, "Giving up on model call");
                return Err(Error::ModelUnavailable { attempts, source: err });
            }

            let backoff = self.retry.backoff_base.powi(attempt as i32 + 2);
            debug!(backoff_secs = backoff, "Backing off before retry");
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            attempt += 1;
        }
    }

    fn record(&self, usage: Option<Usage>, model: &str) -> Result<()> {
        let Some(usage) = usage else {
            return Ok(());
        };
        self.meter
            .record_usage(usage.prompt_tokens, usage.completion_tokens, model)
            .map(|_| ())
            .map_err(|e| Error::Config { message: e.to_string() })
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("provider", &self.provider.name())
            .field("plugins", &self.plugins)
            .field("meter", &self.meter)
            .finish()
    }
}
