//! Interrupt handling for auto-approved runs.
//!
//! The first interrupt while the agent is running without asking (batch
//! approvals left, or continuous mode) drops it back to the authorization
//! gate. An interrupt while it would already ask means the human wants out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Auto-approval was cancelled; the next action needs the human.
    Paused,
    /// Nothing left to pause. The process should exit.
    Terminate,
}

/// Shared approval state, writable from a signal task.
///
/// Cloning shares the state.
#[derive(Debug, Clone)]
pub struct Interrupts {
    next_action_count: Arc<AtomicU32>,
    continuous: Arc<AtomicBool>,
}

impl Interrupts {
    pub fn new(next_action_count: u32, continuous: bool) -> Self {
        Self {
            next_action_count: Arc::new(AtomicU32::new(next_action_count)),
            continuous: Arc::new(AtomicBool::new(continuous)),
        }
    }

    /// Actions still pre-approved.
    pub fn next_action_count(&self) -> u32 {
        self.next_action_count.load(Ordering::SeqCst)
    }

    pub fn set_next_action_count(&self, count: u32) {
        self.next_action_count.store(count, Ordering::SeqCst);
    }

    /// Use up one pre-approved action, if any are left.
    pub fn consume(&self) {
        let _ = self
            .next_action_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether continuous mode is still in effect.
    pub fn continuous(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }

    /// Whether the next action runs without asking.
    pub fn auto_approved(&self) -> bool {
        self.continuous() || self.next_action_count() > 0
    }

    pub fn on_interrupt(&self) -> InterruptOutcome {
        let remaining = self.next_action_count.swap(0, Ordering::SeqCst);
        let was_continuous = self.continuous.swap(false, Ordering::SeqCst);
        if remaining > 0 || was_continuous {
            info!(remaining, was_continuous, "Interrupt received, stopping continuous command execution");
            InterruptOutcome::Paused
        } else {
            InterruptOutcome::Terminate
        }
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new(0, false)
    }
}
