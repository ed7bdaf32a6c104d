//! Model provider implementations for ironloop.
//!
//! Backends implement the `ironloop_core::Provider` trait. The agent never
//! talks to one directly: every call goes through the [`ModelGateway`],
//! which adds retries, metering and plugin hooks.

pub mod gateway;
pub mod openai_compat;
pub mod router;

pub use gateway::ModelGateway;
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
