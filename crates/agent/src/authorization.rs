//! The human authorization gate.
//!
//! Between planning and dispatch a human may approve the proposed command,
//! pre-approve a batch, ask the agent to critique itself, give feedback,
//! or stop the agent. Input is trimmed and lower-cased before it is
//! compared with the configured keys.

use ironloop_config::InteractionConfig;
use thiserror::Error;
use tracing::warn;

use crate::console::Console;

/// What the human decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDecision {
    /// Run the proposed command.
    Approve,
    /// Run the proposed command and the next `n - 1` without asking.
    ApproveMany(u32),
    /// Ask the model to critique its own plan instead of running the command.
    SelfFeedback,
    /// Stop the agent.
    Exit,
    /// Send this text back to the model instead of running the command.
    HumanFeedback(String),
}

/// Input the gate rejects; the human is asked again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Invalid input format.")]
    Empty,

    #[error("Invalid input format. Please enter '{key} -N' where N is the number of continuous tasks.")]
    BadCount { key: String },
}

/// Interpret one line of console input.
pub fn parse_user_input(input: &str, keys: &InteractionConfig) -> Result<UserDecision, InputError> {
    let normalized = input.trim().to_lowercase();
    let authorise = keys.authorise_key.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(InputError::Empty);
    }
    if normalized == authorise {
        return Ok(UserDecision::Approve);
    }
    if normalized == keys.feedback_key.trim().to_lowercase() {
        return Ok(UserDecision::SelfFeedback);
    }
    if normalized.starts_with(&format!("{authorise} -")) {
        return normalized
            .split_whitespace()
            .nth(1)
            .and_then(|count| count.parse::<i64>().ok())
            .and_then(|count| u32::try_from(count.unsigned_abs()).ok())
            .map(UserDecision::ApproveMany)
            .ok_or(InputError::BadCount {
                key: keys.authorise_key.clone(),
            });
    }
    if normalized == keys.exit_key.trim().to_lowercase() {
        return Ok(UserDecision::Exit);
    }
    Ok(UserDecision::HumanFeedback(input.trim().to_string()))
}

/// The instructions shown before asking.
pub fn gate_instructions(keys: &InteractionConfig, ai_name: &str) -> String {
    format!(
        "Enter '{a}' to authorise command, '{a} -N' to run N continuous commands, '{s}' to run self-feedback \
         commands, '{n}' to exit program, or enter feedback for {ai_name}...",
        a = keys.authorise_key,
        s = keys.feedback_key,
        n = keys.exit_key,
    )
}

/// Ask until the human gives a usable answer. End of input means exit.
pub async fn request_authorization(console: &dyn Console, keys: &InteractionConfig, ai_name: &str) -> UserDecision {
    console.say("", &gate_instructions(keys, ai_name));
    let label = if keys.chat_messages_enabled {
        "CHAT MESSAGE: "
    } else {
        "Input: "
    };
    loop {
        let Some(line) = console.read_line(label).await else {
            return UserDecision::Exit;
        };
        match parse_user_input(&line, keys) {
            Ok(decision) => return decision,
            Err(e) => {
                warn!(input = %line, "Rejected authorization input");
                console.warn(&e.to_string());
            }
        }
    }
}
