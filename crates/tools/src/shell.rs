//! Shell command: run a non-interactive command line in the workspace.
//!
//! Only available while `execution.execute_local_commands` is on, and
//! filtered by the configured allowlist or denylist.

use async_trait::async_trait;
use ironloop_config::{AppConfig, ExecutionConfig, ShellControl};
use ironloop_core::action::CommandArgs;
use ironloop_core::command::{Availability, Command, CommandContext, CommandParameter};
use ironloop_core::error::CommandError;
use tokio::process::Command as Process;
use tracing::{info, warn};

const DISABLED_REASON: &str = "You are not allowed to run local shell commands. To execute shell commands, \
execute_local_commands must be set to true in the [execution] section of your config file - \
do not attempt to bypass the restriction.";

/// `execute_shell`
pub struct ShellCommand;

impl ShellCommand {
    /// Whether `command_line` passes the configured allow/deny policy.
    ///
    /// The line is split at `;`, `&`, `|` and newlines, and the program of
    /// every segment is checked. Command substitution is always refused.
    pub fn is_allowed(command_line: &str, execution: &ExecutionConfig) -> bool {
        if command_line.contains('`') || command_line.contains("$(") {
            return false;
        }
        let mut programs = command_line
            .split([';', '&', '|', '\n'])
            .filter_map(|segment| segment.split_whitespace().next())
            .peekable();
        if programs.peek().is_none() {
            return false;
        }
        programs.all(|program| match execution.shell_command_control {
            ShellControl::Allowlist => execution.shell_allowlist.iter().any(|a| a == program),
            ShellControl::Denylist => !execution.shell_denylist.iter().any(|d| d == program),
        })
    }
}

#[async_trait]
impl Command for ShellCommand {
    fn name(&self) -> &str {
        "execute_shell"
    }

    fn description(&self) -> &str {
        "Execute Shell Command, non-interactive commands only"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![CommandParameter::required(
            "command_line",
            "string",
            "The command line to run",
        )]
    }

    fn availability(&self, config: &AppConfig) -> Availability {
        if config.execution.execute_local_commands {
            Availability::Enabled
        } else {
            Availability::Disabled {
                reason: Some(DISABLED_REASON.into()),
            }
        }
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let command_line = args
            .get("command_line")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CommandError::InvalidArguments("'command_line' must be a string".into()))?;

        if !Self::is_allowed(command_line, &ctx.config.execution) {
            info!(command = %command_line, "Shell command not allowed");
            return Err(CommandError::PermissionDenied(
                "This Shell Command is not allowed.".into(),
            ));
        }

        let cwd = ctx.workspace.root();
        info!(command = %command_line, cwd = %cwd.display(), "Executing shell command");

        let output = if cfg!(target_os = "windows") {
            Process::new("cmd").args(["/C", command_line]).current_dir(cwd).output().await
        } else {
            Process::new("sh").args(["-c", command_line]).current_dir(cwd).output().await
        }?;

        if !output.status.success() {
            warn!(
                command = %command_line,
                exit_code = output.status.code().unwrap_or(-1),
                "Shell command exited unsuccessfully"
            );
        }

        Ok(format!(
            "STDOUT:\n{}\nSTDERR:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}
