//! # Ironloop Core
//!
//! Domain types, traits, and error definitions for the ironloop agent runtime.
//! Every seam of the interaction loop (model backends, commands, plugins)
//! is defined as a trait here. Implementations live in their own crates,
//! which all depend inward on this one.

pub mod action;
pub mod command;
pub mod error;
pub mod event;
pub mod message;
pub mod plugin;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use action::{CommandArgs, CommandCall, Thoughts};
pub use command::{
    Availability, Command, CommandContext, CommandOutcome, CommandParameter, CommandRegistry, FnCommand,
    ToolDefinition,
};
pub use error::{CommandError, Error, ProviderError, Result};
pub use event::{AgentEvent, EventBus, HaltReason};
pub use message::{Message, MessageKind, Role};
pub use plugin::{Hook, Plugin, PluginBus};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, TextCompletionRequest, Usage,
};
