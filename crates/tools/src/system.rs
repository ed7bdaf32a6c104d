//! `task_complete`: the agent's way of saying it is done.

use async_trait::async_trait;
use ironloop_core::action::CommandArgs;
use ironloop_core::command::{Command, CommandContext, CommandParameter};
use ironloop_core::error::CommandError;
use tracing::info;

pub struct TaskCompleteCommand;

#[async_trait]
impl Command for TaskCompleteCommand {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Task Complete (Shutdown)"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![CommandParameter::required("reason", "string", "Why the task is finished")]
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or_default();
        info!(agent = %ctx.agent_name, reason = %reason, "Task complete");
        Ok(format!("Shutting down: {reason}"))
    }
}
