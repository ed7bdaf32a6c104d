//! Shared test doubles for the agent crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ironloop_config::AppConfig;
use ironloop_core::error::ProviderError;
use ironloop_core::message::Message;
use ironloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use ironloop_providers::ModelGateway;
use ironloop_telemetry::BudgetMeter;

/// Replays scripted replies in order and records every request.
///
/// Once the script runs out every call answers `{}`.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<usize>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// The content of the last message of every request.
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let model = request.model.clone();
        self.seen.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("{}".into()))?;
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

/// A gateway over `provider` with default configuration and no retries.
pub fn gateway(provider: Arc<ScriptedProvider>) -> ModelGateway {
    let mut config = AppConfig::default();
    config.retry.num_retries = 0;
    ModelGateway::new(provider, Arc::new(BudgetMeter::from_config(&config)), &config)
}
