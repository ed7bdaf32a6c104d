//! Cost tracking and budget accounting for ironloop.
//!
//! Every successful model call is priced against a per-model table and
//! added to a shared ledger. The ledger never stops the agent on its own;
//! it reports where spend stands so the loop can tell the model.

pub mod meter;
pub mod pricing;

pub use meter::{BudgetMeter, BudgetStatus, UsageSnapshot};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the metering subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("no pricing known for model '{0}'")]
    UnknownModel(String),
}
