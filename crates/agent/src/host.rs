//! Agent host: running several agents as tokio tasks.
//!
//! Each agent gets two channels. A `watch` flag is the hard stop: the loop
//! races it against whatever it is awaiting and exits without recording a
//! result. An `mpsc` control channel carries the graceful shutdown, which
//! the loop only looks at between cycles.

use std::collections::HashMap;

use ironloop_core::event::HaltReason;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::loop_runner::Agent;

pub type AgentId = Uuid;

const CONTROL_CAPACITY: usize = 8;

/// Messages an agent reads between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Abort mid-cycle.
    Immediate,
    /// Finish the current cycle first.
    Graceful,
}

/// How an agent's run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub id: AgentId,
    pub name: String,
    pub reason: HaltReason,
    pub cycles: u64,
    pub history_len: usize,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no agent with id {0}")]
    UnknownAgent(AgentId),

    #[error("agent {id} panicked: {message}")]
    Panicked { id: AgentId, message: String },
}

struct Hosted {
    name: String,
    control: mpsc::Sender<ControlMessage>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<AgentReport>,
}

/// Owns the running agents.
#[derive(Default)]
pub struct AgentHost {
    agents: HashMap<AgentId, Hosted>,
}

impl AgentHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `agent` on its own task.
    pub fn spawn(&mut self, agent: Agent) -> AgentId {
        let id = Uuid::new_v4();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let name = agent.name().to_string();

        let mut agent = agent.with_control(control_rx).with_cancellation(cancel_rx);
        let task = tokio::spawn(async move {
            let reason = agent.run().await;
            AgentReport {
                id,
                name: agent.name().to_string(),
                reason,
                cycles: agent.cycle_count(),
                history_len: agent.history().len(),
            }
        });

        info!(agent = %name, %id, "Agent spawned");
        self.agents.insert(
            id,
            Hosted {
                name,
                control: control_tx,
                cancel: cancel_tx,
                task,
            },
        );
        id
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Whether the agent's task is still running.
    pub fn is_running(&self, id: AgentId) -> bool {
        self.agents.get(&id).is_some_and(|h| !h.task.is_finished())
    }

    /// Ask an agent to stop. Stopping an agent that already finished is a no-op.
    pub async fn stop(&self, id: AgentId, mode: StopMode) -> Result<(), HostError> {
        let hosted = self.agents.get(&id).ok_or(HostError::UnknownAgent(id))?;
        info!(agent = %hosted.name, %id, ?mode, "Stopping agent");
        match mode {
            StopMode::Immediate => {
                let _ = hosted.cancel.send(true);
            }
            StopMode::Graceful => {
                if hosted.control.send(ControlMessage::Shutdown).await.is_err() {
                    debug!(agent = %hosted.name, "Agent already finished");
                }
            }
        }
        Ok(())
    }

    /// Wait for an agent to finish and take its report.
    pub async fn join(&mut self, id: AgentId) -> Result<AgentReport, HostError> {
        let hosted = self.agents.remove(&id).ok_or(HostError::UnknownAgent(id))?;
        hosted.task.await.map_err(|e| HostError::Panicked {
            id,
            message: e.to_string(),
        })
    }

    /// Stop every agent and collect the reports of those that did not panic.
    pub async fn shutdown_all(&mut self, mode: StopMode) -> Vec<AgentReport> {
        let ids = self.ids();
        for id in &ids {
            let _ = self.stop(*id, mode).await;
        }
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(report) = self.join(id).await {
                reports.push(report);
            }
        }
        reports
    }
}

impl std::fmt::Debug for AgentHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHost").field("agents", &self.agents.len()).finish()
    }
}
