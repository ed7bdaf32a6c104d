//! Agent event system: observing the loop without coupling to it.
//!
//! The interaction loop publishes an event at each notable step. The CLI
//! renders some of them; a host can collect them for a run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why an agent stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The user typed the exit key (or input ended)
    UserExit,
    /// Continuous mode ran past its cycle limit
    ContinuousLimitReached,
    /// A terminal command ran (task_complete)
    TaskComplete,
    /// The host asked for a graceful shutdown
    Shutdown,
    /// The host cancelled the agent mid-cycle
    Cancelled,
    /// A fatal error ended the run
    Failed(String),
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::UserExit => f.write_str("exited by user"),
            HaltReason::ContinuousLimitReached => f.write_str("continuous limit reached"),
            HaltReason::TaskComplete => f.write_str("task complete"),
            HaltReason::Shutdown => f.write_str("shut down"),
            HaltReason::Cancelled => f.write_str("cancelled"),
            HaltReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Events published by a running agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A new cycle began
    CycleStarted {
        agent: String,
        cycle: u64,
        timestamp: DateTime<Utc>,
    },

    /// The model proposed a command
    ActionProposed {
        agent: String,
        command: String,
        timestamp: DateTime<Utc>,
    },

    /// A command (or pseudo-command) produced its result
    CommandExecuted {
        agent: String,
        command: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A model call gave up after retries
    ModelCallFailed {
        agent: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent stopped
    Halted {
        agent: String,
        reason: HaltReason,
        cycles: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
