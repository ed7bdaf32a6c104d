//! Built-in commands for ironloop agents.
//!
//! Commands give the agent the ability to act on its workspace: read,
//! write, append to and delete files, list directories, run shell
//! commands, and declare the task finished.

pub mod file_operations;
pub mod oplog;
pub mod shell;
pub mod system;

use ironloop_core::command::CommandRegistry;

pub use oplog::{OpLogError, Operation, OperationLog, OperationRecord, text_checksum};

/// Create a registry holding every built-in command.
///
/// `execute_shell` is always registered; whether it may run is decided
/// per call from `execution.execute_local_commands`.
pub fn default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Box::new(file_operations::ReadFileCommand));
    registry.register(Box::new(file_operations::WriteToFileCommand));
    registry.register(Box::new(file_operations::AppendToFileCommand));
    registry.register(Box::new(file_operations::DeleteFileCommand));
    registry.register(Box::new(file_operations::ListFilesCommand));
    registry.register(Box::new(shell::ShellCommand));
    registry.register(Box::new(system::TaskCompleteCommand));
    registry
}
