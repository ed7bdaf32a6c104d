//! The ironloop agent: an autonomous command loop.
//!
//! Each cycle follows **Plan → Authorize → Act → Observe**:
//!
//! 1. **Plan**: build the prompt (system prompt, summary, recent history,
//!    triggering prompt) and ask the model for its next action
//! 2. **Repair** the reply into a `{thoughts, command}` object
//! 3. **Authorize**: ask the human, unless actions are pre-approved
//! 4. **Act**: dispatch the command through the registry and plugin hooks
//! 5. **Observe**: record the result as a system message
//!
//! The loop runs until the model completes its task, the human exits,
//! or the continuous-mode cycle limit is reached.

pub mod authorization;
pub mod console;
pub mod cycle_log;
pub mod history;
pub mod host;
pub mod interrupt;
pub mod loop_runner;
pub mod prompt;
pub mod repair;

#[cfg(test)]
pub(crate) mod test_support;

pub use authorization::{InputError, UserDecision, parse_user_input};
pub use console::{Console, ScriptedConsole, StdinConsole};
pub use cycle_log::CycleLogger;
pub use history::{Cycle, History};
pub use host::{AgentHost, AgentId, AgentReport, ControlMessage, HostError, StopMode};
pub use interrupt::{InterruptOutcome, Interrupts};
pub use loop_runner::{Agent, CycleOutcome};
pub use prompt::{PromptBuilder, PromptGenerator, construct_full_prompt};
pub use repair::{JsonFixer, NoFixer, repair_response};
