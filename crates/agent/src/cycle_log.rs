//! Per-cycle debug dumps.
//!
//! With `logging.log_cycles` on, each cycle writes what went into and came
//! out of the model under
//! `<log_dir>/<ai_name>_<created_at>/<cycle:03>/<n>_<file_name>`.
//! Write failures are logged and otherwise ignored.

use std::fs;
use std::path::{Path, PathBuf};

use ironloop_config::AppConfig;
use serde::Serialize;
use tracing::warn;

pub const FULL_MESSAGE_HISTORY_FILE_NAME: &str = "full_message_history.json";
pub const NEXT_ACTION_FILE_NAME: &str = "next_action.json";
pub const USER_INPUT_FILE_NAME: &str = "user_input.txt";
pub const PROMPT_SUPERVISOR_FEEDBACK_FILE_NAME: &str = "prompt_supervisor_feedback.json";
pub const SUPERVISOR_FEEDBACK_FILE_NAME: &str = "supervisor_feedback.txt";

#[derive(Debug, Clone)]
pub struct CycleLogger {
    /// `None` when cycle logging is off.
    agent_dir: Option<PathBuf>,
    count_within_cycle: usize,
}

impl CycleLogger {
    pub fn new(log_dir: impl AsRef<Path>, ai_name: &str, created_at: &str) -> Self {
        let folder = format!("{}_{created_at}", sanitize(ai_name));
        Self {
            agent_dir: Some(log_dir.as_ref().join(folder)),
            count_within_cycle: 0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            agent_dir: None,
            count_within_cycle: 0,
        }
    }

    pub fn from_config(config: &AppConfig, created_at: &str) -> Self {
        if config.logging.log_cycles {
            Self::new(&config.logging.log_dir, &config.ai.name, created_at)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.agent_dir.is_some()
    }

    /// Start numbering files from zero for a new cycle.
    pub fn start_cycle(&mut self) {
        self.count_within_cycle = 0;
    }

    /// Dump `data` as pretty JSON.
    pub fn log<T: Serialize + ?Sized>(&mut self, cycle: u64, data: &T, file_name: &str) {
        if !self.is_enabled() {
            return;
        }
        match serde_json::to_string_pretty(data) {
            Ok(json) => self.write(cycle, &json, file_name),
            Err(e) => warn!(file = file_name, error = %e, "Could not serialize cycle log entry"),
        }
    }

    /// Dump plain text.
    pub fn log_text(&mut self, cycle: u64, text: &str, file_name: &str) {
        if self.is_enabled() {
            self.write(cycle, text, file_name);
        }
    }

    fn write(&mut self, cycle: u64, contents: &str, file_name: &str) {
        let Some(agent_dir) = &self.agent_dir else {
            return;
        };
        let cycle_dir = agent_dir.join(format!("{cycle:03}"));
        let path = cycle_dir.join(format!("{}_{file_name}", self.count_within_cycle));
        self.count_within_cycle += 1;

        if let Err(e) = fs::create_dir_all(&cycle_dir).and_then(|_| fs::write(&path, contents)) {
            warn!(path = %path.display(), error = %e, "Could not write cycle log");
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
