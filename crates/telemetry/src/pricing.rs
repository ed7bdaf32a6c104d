//! Built-in pricing table for the supported models.
//!
//! Prices are in USD per 1K tokens, with separate prompt and completion
//! rates. Custom pricing can be added at runtime via TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use ironloop_config::LlmConfig;

use crate::MeterError;

/// Per-1K-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1K prompt tokens in USD.
    pub prompt_per_k: f64,
    /// Price per 1K completion tokens in USD.
    pub completion_per_k: f64,
}

impl ModelPricing {
    pub fn new(prompt_per_k: f64, completion_per_k: f64) -> Self {
        Self {
            prompt_per_k,
            completion_per_k,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_k + completion_tokens as f64 * self.completion_per_k) / 1000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Chat ───────────────────────────────────────────────────
        prices.insert("gpt-3.5-turbo".into(), ModelPricing::new(0.0015, 0.002));
        prices.insert("gpt-3.5-turbo-16k".into(), ModelPricing::new(0.003, 0.004));
        prices.insert("gpt-4".into(), ModelPricing::new(0.03, 0.06));
        prices.insert("gpt-4-32k".into(), ModelPricing::new(0.06, 0.12));

        // ── Embeddings ─────────────────────────────────────────────
        prices.insert("text-embedding-ada-002".into(), ModelPricing::new(0.0001, 0.0));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Built-in prices plus the `[llm.custom_pricing]` overrides.
    pub fn from_config(llm: &LlmConfig) -> Self {
        let table = Self::with_defaults();
        for (model, price) in &llm.custom_pricing {
            table.set(model.clone(), ModelPricing::new(price.prompt_per_k, price.completion_per_k));
        }
        table
    }

    /// Look up pricing for a model by exact name.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Find the pricing that applies to `model`.
    ///
    /// Tries an exact match first, then strips a provider prefix
    /// (`openai/gpt-4` → `gpt-4`), then picks the longest known name that
    /// prefixes the model (`gpt-4-0613` matches `gpt-4`).
    pub fn resolve(&self, model: &str) -> Result<ModelPricing, MeterError> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Ok(*p);
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);
        if let Some(p) = prices.get(bare_model) {
            return Ok(*p);
        }

        prices
            .iter()
            .filter(|(key, _)| bare_model.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
            .ok_or_else(|| MeterError::UnknownModel(model.to_string()))
    }

    /// Compute cost for a model call. Unknown models are an error.
    pub fn compute_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> Result<f64, MeterError> {
        Ok(self.resolve(model)?.cost(prompt_tokens, completion_tokens))
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable").field("models", &self.models()).finish()
    }
}
