//! Budget meter: cumulative token and cost accounting.
//!
//! One meter is constructed per run and shared by reference with the model
//! gateway and the loop. All mutations go through a single mutex so
//! concurrent agents sharing a meter never lose an update.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use ironloop_config::AppConfig;

use crate::MeterError;
use crate::pricing::PricingTable;

#[derive(Debug, Default)]
struct Ledger {
    prompt_tokens: u64,
    completion_tokens: u64,
    calls: u64,
    total_cost: f64,
    total_budget: f64,
}

/// A point-in-time copy of the meter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
    pub total_cost: f64,
    pub total_budget: f64,
}

/// Where spend stands relative to the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetStatus {
    /// No ceiling configured
    Unlimited,
    Healthy { remaining: f64 },
    /// Less than a cent left
    Nearly { remaining: f64 },
    /// Less than half a cent left
    VeryNearly { remaining: f64 },
    Exceeded,
}

impl BudgetStatus {
    /// The line shown to the model each cycle, if a ceiling is set.
    pub fn message(&self) -> Option<String> {
        let (remaining, suffix) = match *self {
            BudgetStatus::Unlimited => return None,
            BudgetStatus::Healthy { remaining } => (remaining, ""),
            BudgetStatus::Nearly { remaining } => (remaining, " Budget nearly exceeded. Finish up."),
            BudgetStatus::VeryNearly { remaining } => {
                (remaining, " Budget very nearly exceeded! Shut down gracefully!")
            }
            BudgetStatus::Exceeded => (0.0, " BUDGET EXCEEDED! SHUT DOWN!"),
        };
        Some(format!("Your remaining API budget is ${remaining:.3}{suffix}"))
    }
}

/// Cumulative usage ledger with a per-model price table.
pub struct BudgetMeter {
    pricing: PricingTable,
    ledger: Mutex<Ledger>,
}

impl BudgetMeter {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Meter with the configured price overrides and budget ceiling.
    pub fn from_config(config: &AppConfig) -> Self {
        let meter = Self::new(PricingTable::from_config(&config.llm));
        meter.set_budget(config.budget.total_budget);
        meter
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one successful model call and return its cost.
    ///
    /// An unknown model leaves the counters untouched.
    pub fn record_usage(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> Result<f64, MeterError> {
        let cost = self.pricing.compute_cost(model, prompt_tokens, completion_tokens)?;
        let mut ledger = self.ledger();
        ledger.prompt_tokens += u64::from(prompt_tokens);
        ledger.completion_tokens += u64::from(completion_tokens);
        ledger.calls += 1;
        ledger.total_cost += cost;
        debug!(
            model = %model,
            prompt_tokens,
            completion_tokens,
            cost,
            total_cost = ledger.total_cost,
            "Recorded model usage"
        );
        Ok(cost)
    }

    pub fn total_cost(&self) -> f64 {
        self.ledger().total_cost
    }

    pub fn total_budget(&self) -> f64 {
        self.ledger().total_budget
    }

    /// Set the spend ceiling in USD. Zero means no ceiling.
    pub fn set_budget(&self, total_budget: f64) {
        self.ledger().total_budget = total_budget;
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.ledger().prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.ledger().completion_tokens
    }

    /// Remaining spend, floored at zero. `None` without a ceiling.
    pub fn remaining_budget(&self) -> Option<f64> {
        let ledger = self.ledger();
        (ledger.total_budget > 0.0).then(|| (ledger.total_budget - ledger.total_cost).max(0.0))
    }

    pub fn budget_status(&self) -> BudgetStatus {
        match self.remaining_budget() {
            None => BudgetStatus::Unlimited,
            Some(remaining) if remaining <= 0.0 => BudgetStatus::Exceeded,
            Some(remaining) if remaining < 0.005 => BudgetStatus::VeryNearly { remaining },
            Some(remaining) if remaining < 0.01 => BudgetStatus::Nearly { remaining },
            Some(remaining) => BudgetStatus::Healthy { remaining },
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let ledger = self.ledger();
        UsageSnapshot {
            prompt_tokens: ledger.prompt_tokens,
            completion_tokens: ledger.completion_tokens,
            calls: ledger.calls,
            total_cost: ledger.total_cost,
            total_budget: ledger.total_budget,
        }
    }

    /// Zero every counter, including the budget ceiling.
    pub fn reset(&self) {
        *self.ledger() = Ledger::default();
    }
}

impl Default for BudgetMeter {
    fn default() -> Self {
        Self::new(PricingTable::with_defaults())
    }
}

impl std::fmt::Debug for BudgetMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetMeter").field("usage", &self.snapshot()).finish()
    }
}
