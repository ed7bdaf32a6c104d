//! Command trait and registry: the agent's capabilities.
//!
//! Commands are what let the agent act: read and write workspace files,
//! run shell commands, finish the task. The registry maps names to
//! commands and is the single dispatch boundary: whatever happens inside
//! a command, the caller gets text back that the model can read.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use ironloop_config::AppConfig;
use ironloop_security::Workspace;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use crate::action::CommandArgs;
use crate::error::CommandError;

/// One entry of a command's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    /// JSON type name ("string", "integer", ...)
    pub kind: String,
    pub description: String,
    pub required: bool,
}

impl CommandParameter {
    pub fn required(name: impl Into<String>, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Whether a command may run right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Enabled,
    Disabled { reason: Option<String> },
}

/// Context injected into every command invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// The active configuration
    pub config: Arc<AppConfig>,
    /// The owning agent's sandbox
    pub workspace: Arc<Workspace>,
    /// The owning agent's name
    pub agent_name: String,
}

/// The core Command trait.
///
/// Each built-in (file operations, shell, task_complete) implements this
/// trait and is registered in the [`CommandRegistry`] once at startup.
#[async_trait]
pub trait Command: Send + Sync {
    /// The unique name of this command (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this command does (shown to the model).
    fn description(&self) -> &str;

    /// Ordered parameters.
    fn signature(&self) -> Vec<CommandParameter>;

    /// Evaluated on every call, so availability can follow configuration.
    fn availability(&self, _config: &AppConfig) -> Availability {
        Availability::Enabled
    }

    /// A terminal command ends the interaction loop once its result is recorded.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Execute the command with the given arguments.
    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError>;

    /// The line describing this command in the system prompt.
    fn prompt_line(&self) -> String {
        let args = self
            .signature()
            .iter()
            .map(|p| format!("\"{}\": \"<{}>\"", p.name, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}: {}, args: {}", self.name(), self.description(), args)
    }
}

/// What a dispatch produced. Every variant carries the text fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed(String),
    Disabled(String),
    Failed(String),
    Unknown(String),
}

impl CommandOutcome {
    pub fn text(&self) -> &str {
        match self {
            CommandOutcome::Completed(t)
            | CommandOutcome::Disabled(t)
            | CommandOutcome::Failed(t)
            | CommandOutcome::Unknown(t) => t,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            CommandOutcome::Completed(t)
            | CommandOutcome::Disabled(t)
            | CommandOutcome::Failed(t)
            | CommandOutcome::Unknown(t) => t,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed(_))
    }
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// A registry of available commands.
///
/// Registering a name twice replaces the earlier command, so plugins and
/// tools can override built-ins. Prompt order is first-registration order.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn Command>>,
    order: Vec<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a command. Replaces any existing command with the same name.
    pub fn register(&mut self, command: Box<dyn Command>) {
        let name = command.name().to_string();
        if self.commands.insert(name.clone(), command).is_some() {
            debug!(command = %name, "Replaced existing command");
        } else {
            self.order.push(name);
        }
    }

    /// Remove a command by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.commands.remove(name).is_some()
    }

    /// Get a command by name.
    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Commands currently enabled under `config`, in registration order.
    pub fn enabled(&self, config: &AppConfig) -> Vec<&dyn Command> {
        self.order
            .iter()
            .filter_map(|name| self.get(name))
            .filter(|c| c.availability(config) == Availability::Enabled)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Dispatch a command by name.
    ///
    /// Never fails: unknown and disabled commands, missing arguments,
    /// handler errors and handler panics all come back as text.
    pub async fn call(&self, name: &str, args: CommandArgs, ctx: &CommandContext) -> CommandOutcome {
        let Some(command) = self.get(name) else {
            warn!(command = %name, "Unknown command requested");
            return CommandOutcome::Unknown(format!(
                "Unknown command '{name}'. Please refer to the 'COMMANDS' list for available commands and only respond in the specified JSON format."
            ));
        };

        if let Availability::Disabled { reason } = command.availability(&ctx.config) {
            info!(command = %name, "Refusing to run disabled command");
            return CommandOutcome::Disabled(match reason {
                Some(reason) => format!("Command '{name}' is disabled: {reason}"),
                None => format!("Command '{name}' is disabled"),
            });
        }

        if let Some(missing) = command
            .signature()
            .into_iter()
            .find(|p| p.required && !args.contains_key(&p.name))
        {
            return CommandOutcome::Failed(format!(
                "Error: {}",
                CommandError::MissingArgument(missing.name)
            ));
        }

        debug!(command = %name, "Executing command");
        match AssertUnwindSafe(command.execute(args, ctx)).catch_unwind().await {
            Ok(Ok(text)) => CommandOutcome::Completed(text),
            Ok(Err(e)) => {
                warn!(command = %name, error = %e, "Command failed");
                CommandOutcome::Failed(format!("Error: {e}"))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "command panicked".into());
                warn!(command = %name, panic = %message, "Command panicked");
                CommandOutcome::Failed(format!("Error: {message}"))
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool description coming from outside the registry
/// (name, description and a JSON Schema for the parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

type Handler =
    Arc<dyn Fn(CommandArgs, CommandContext) -> BoxFuture<'static, Result<String, CommandError>> + Send + Sync>;
type EnabledPredicate = Arc<dyn Fn(&AppConfig) -> bool + Send + Sync>;

enum Enabled {
    Fixed(bool),
    When(EnabledPredicate),
}

/// A command built from a closure.
pub struct FnCommand {
    name: String,
    description: String,
    signature: Vec<CommandParameter>,
    enabled: Enabled,
    disabled_reason: Option<String>,
    terminal: bool,
    handler: Handler,
}

impl FnCommand {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandArgs, CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, CommandError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            signature: Vec::new(),
            enabled: Enabled::Fixed(true),
            disabled_reason: None,
            terminal: false,
            handler: Arc::new(move |args, ctx| handler(args, ctx).boxed()),
        }
    }

    /// Adapt an external tool description. Parameters are read from the
    /// schema's `properties`, and `required` marks the mandatory ones.
    pub fn from_definition<F, Fut>(definition: &ToolDefinition, handler: F) -> Self
    where
        F: Fn(CommandArgs, CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, CommandError>> + Send + 'static,
    {
        let required: Vec<&str> = definition.parameters["required"]
            .as_array()
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default();

        let mut command = Self::new(&definition.name, &definition.description, handler);
        if let Some(properties) = definition.parameters["properties"].as_object() {
            for (name, schema) in properties {
                command.signature.push(CommandParameter {
                    name: name.clone(),
                    kind: schema["type"].as_str().unwrap_or("string").to_string(),
                    description: schema["description"].as_str().unwrap_or_default().to_string(),
                    required: required.contains(&name.as_str()),
                });
            }
        }
        command
    }

    pub fn arg(mut self, parameter: CommandParameter) -> Self {
        self.signature.push(parameter);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Enabled::Fixed(enabled);
        self
    }

    /// Enable the command only while `predicate` holds for the active configuration.
    pub fn enabled_when(mut self, predicate: impl Fn(&AppConfig) -> bool + Send + Sync + 'static) -> Self {
        self.enabled = Enabled::When(Arc::new(predicate));
        self
    }

    pub fn disabled_reason(mut self, reason: impl Into<String>) -> Self {
        self.disabled_reason = Some(reason.into());
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

#[async_trait]
impl Command for FnCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn signature(&self) -> Vec<CommandParameter> {
        self.signature.clone()
    }

    fn availability(&self, config: &AppConfig) -> Availability {
        let enabled = match &self.enabled {
            Enabled::Fixed(enabled) => *enabled,
            Enabled::When(predicate) => predicate(config),
        };
        if enabled {
            Availability::Enabled
        } else {
            Availability::Disabled {
                reason: self.disabled_reason.clone(),
            }
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        (self.handler)(args, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(config: AppConfig) -> (tempfile::TempDir, CommandContext) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), true).unwrap();
        let ctx = CommandContext {
            config: Arc::new(config),
            workspace: Arc::new(workspace),
            agent_name: "tester".into(),
        };
        (dir, ctx)
    }

    fn args(value: serde_json::Value) -> CommandArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    fn echo() -> FnCommand {
        FnCommand::new("echo", "Echoes back the input", |args, _ctx| async move {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        })
        .arg(CommandParameter::required("text", "string", "Text to echo"))
    }

    #[tokio::test]
    async fn registered_command_runs() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(echo()));
        let (_dir, ctx) = context(AppConfig::default());

        let outcome = registry.call("echo", args(json!({"text": "hello world"})), &ctx).await;
        assert_eq!(outcome, CommandOutcome::Completed("hello world".into()));
    }

    #[tokio::test]
    async fn reregistering_replaces_command() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(echo()));
        registry.register(Box::new(FnCommand::new("echo", "Shouts", |_args, _ctx| async {
            Ok("LOUD".to_string())
        })));
        let (_dir, ctx) = context(AppConfig::default());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["echo"]);
        let outcome = registry.call("echo", CommandArgs::new(), &ctx).await;
        assert_eq!(outcome.text(), "LOUD");
    }

    #[tokio::test]
    async fn disabled_command_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(
            FnCommand::new("shell", "Run a shell command", move |_args, _ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(String::new()) }
            })
            .enabled(false)
            .disabled_reason("local commands are turned off"),
        ));
        let (_dir, ctx) = context(AppConfig::default());

        let outcome = registry.call("shell", CommandArgs::new(), &ctx).await;
        assert!(matches!(outcome, CommandOutcome::Disabled(_)));
        assert_eq!(outcome.text(), "Command 'shell' is disabled: local commands are turned off");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_without_reason() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(echo().enabled(false)));
        let (_dir, ctx) = context(AppConfig::default());
        let outcome = registry.call("echo", args(json!({"text": "x"})), &ctx).await;
        assert_eq!(outcome.text(), "Command 'echo' is disabled");
    }

    #[tokio::test]
    async fn predicate_is_evaluated_per_call() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(
            echo().enabled_when(|config| config.execution.execute_local_commands),
        ));

        let (_dir, off) = context(AppConfig::default());
        let outcome = registry.call("echo", args(json!({"text": "x"})), &off).await;
        assert!(matches!(outcome, CommandOutcome::Disabled(_)));

        let mut config = AppConfig::default();
        config.execution.execute_local_commands = true;
        let (_dir2, on) = context(config);
        let outcome = registry.call("echo", args(json!({"text": "x"})), &on).await;
        assert_eq!(outcome, CommandOutcome::Completed("x".into()));
    }

    #[tokio::test]
    async fn handler_error_becomes_text() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(FnCommand::new("boom", "Always fails", |_args, _ctx| async {
            Err(CommandError::ExecutionFailed("disk on fire".into()))
        })));
        let (_dir, ctx) = context(AppConfig::default());

        let outcome = registry.call("boom", CommandArgs::new(), &ctx).await;
        assert!(matches!(outcome, CommandOutcome::Failed(_)));
        assert_eq!(outcome.text(), "Error: disk on fire");
    }

    #[tokio::test]
    async fn handler_panic_becomes_text() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(FnCommand::new("panicky", "Panics", |_args, _ctx| async {
            if true {
                panic!("unexpected state");
            }
            Ok(String::new())
        })));
        let (_dir, ctx) = context(AppConfig::default());

        let outcome = registry.call("panicky", CommandArgs::new(), &ctx).await;
        assert!(outcome.text().starts_with("Error:"));
        assert!(outcome.text().contains("unexpected state"));
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(echo()));
        let (_dir, ctx) = context(AppConfig::default());
        let outcome = registry.call("echo", CommandArgs::new(), &ctx).await;
        assert_eq!(outcome.text(), "Error: missing required argument 'text'");
    }

    #[tokio::test]
    async fn unknown_command() {
        let registry = CommandRegistry::new();
        let (_dir, ctx) = context(AppConfig::default());
        let outcome = registry.call("nonexistent", CommandArgs::new(), &ctx).await;
        assert!(matches!(outcome, CommandOutcome::Unknown(_)));
        assert!(outcome.text().contains("Unknown command 'nonexistent'"));
    }

    #[test]
    fn enabled_lists_only_available_commands() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(echo()));
        registry.register(Box::new(
            FnCommand::new("shell", "Run", |_a, _c| async { Ok(String::new()) }).enabled(false),
        ));
        let enabled = registry.enabled(&AppConfig::default());
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name(), "echo");
    }

    #[test]
    fn from_definition_reads_schema() {
        let definition = ToolDefinition {
            name: "fetch".into(),
            description: "Fetch a URL".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Where to go"},
                    "timeout": {"type": "integer"}
                },
                "required": ["url"]
            }),
        };
        let command = FnCommand::from_definition(&definition, |_a, _c| async { Ok(String::new()) });
        let signature = command.signature();
        let url = signature.iter().find(|p| p.name == "url").unwrap();
        assert!(url.required);
        assert_eq!(url.description, "Where to go");
        let timeout = signature.iter().find(|p| p.name == "timeout").unwrap();
        assert!(!timeout.required);
        assert_eq!(timeout.kind, "integer");
    }

    #[test]
    fn prompt_line_lists_arguments() {
        let line = echo().prompt_line();
        assert_eq!(line, "echo: Echoes back the input, args: \"text\": \"<text>\"");
    }
}
