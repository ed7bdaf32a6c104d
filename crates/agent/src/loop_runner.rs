//! The agent interaction loop.
//!
//! One cycle is: build the prompt, ask the model, repair its reply into an
//! action, let plugins rewrite it, ask the human (unless pre-approved),
//! dispatch the command, and record the result in history.
//!
//! Everything the model can react to comes back as a system message. Only
//! configuration errors end the loop with an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ironloop_config::AppConfig;
use ironloop_core::action::{CommandCall, Thoughts};
use ironloop_core::command::{CommandContext, CommandRegistry};
use ironloop_core::error::{Error, Result};
use ironloop_core::event::{AgentEvent, EventBus, HaltReason};
use ironloop_core::message::{Message, MessageKind, Role};
use ironloop_core::token;
use ironloop_providers::ModelGateway;
use ironloop_security::Workspace;
use ironloop_telemetry::BudgetStatus;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::authorization::{UserDecision, request_authorization};
use crate::console::Console;
use crate::cycle_log::{
    CycleLogger, FULL_MESSAGE_HISTORY_FILE_NAME, NEXT_ACTION_FILE_NAME, PROMPT_SUPERVISOR_FEEDBACK_FILE_NAME,
    SUPERVISOR_FEEDBACK_FILE_NAME, USER_INPUT_FILE_NAME,
};
use crate::history::History;
use crate::host::ControlMessage;
use crate::interrupt::Interrupts;
use crate::prompt::{PromptBuilder, construct_full_prompt};
use crate::repair::repair_response;

/// Tokens kept free on top of a command's output and the running summary.
pub const RESULT_SAFETY_MARGIN: usize = 600;

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A result (or failure text) was recorded; run another cycle.
    Continue,
    /// The model could not be reached; nothing was recorded.
    Skipped,
    /// The agent must stop.
    Halted(HaltReason),
}

/// What the repaired reply asks for.
enum Planned {
    /// The reply held no usable action.
    Nothing,
    /// The action was malformed; the text explains how.
    Invalid(String),
    Call(CommandCall),
}

/// An autonomous agent: one conversation, one workspace, one loop.
pub struct Agent {
    name: String,
    config: Arc<AppConfig>,
    gateway: Arc<ModelGateway>,
    registry: Arc<CommandRegistry>,
    context: CommandContext,
    console: Arc<dyn Console>,
    events: EventBus,
    history: History,
    prompt: PromptBuilder,
    interrupts: Interrupts,
    cycle_log: CycleLogger,
    cycle_count: u64,
    control: Option<mpsc::Receiver<ControlMessage>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Agent {
    /// Create an agent from its configuration.
    ///
    /// The system prompt is generated from `config.ai` and the commands
    /// enabled in `registry`. The prompt may use three quarters of the fast
    /// model's token limit, a sixth of which is reserved for the summary.
    pub fn new(
        config: Arc<AppConfig>,
        gateway: Arc<ModelGateway>,
        registry: Arc<CommandRegistry>,
        workspace: Arc<Workspace>,
        console: Arc<dyn Console>,
    ) -> Self {
        let name = config.ai.name.clone();
        let send_token_limit = config.llm.fast_token_limit * 3 / 4;
        let system_prompt = construct_full_prompt(&config.ai, &registry, &config);
        let created_at = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

        Self {
            context: CommandContext {
                config: config.clone(),
                workspace,
                agent_name: name.clone(),
            },
            prompt: PromptBuilder::new(system_prompt, &config.interaction.triggering_prompt, send_token_limit),
            history: History::new(send_token_limit / 6),
            interrupts: Interrupts::new(
                config.interaction.next_action_count,
                config.interaction.continuous_mode,
            ),
            cycle_log: CycleLogger::from_config(&config, &created_at),
            events: EventBus::default(),
            cycle_count: 0,
            control: None,
            cancel: None,
            name,
            config,
            gateway,
            registry,
            console,
        }
    }

    /// Publish events on `events` instead of a private bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Share approval state with a signal handler.
    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = interrupts;
        self
    }

    /// Replace the generated system prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.prompt = PromptBuilder::new(
            system_prompt,
            self.prompt.triggering_prompt().to_string(),
            self.prompt.send_token_limit(),
        );
        self
    }

    /// Resume from an existing history.
    pub fn with_history(mut self, history: History) -> Self {
        self.history = history;
        self
    }

    pub fn with_cycle_logger(mut self, cycle_log: CycleLogger) -> Self {
        self.cycle_log = cycle_log;
        self
    }

    /// Observe `ControlMessage`s at the top of each cycle.
    pub fn with_control(mut self, control: mpsc::Receiver<ControlMessage>) -> Self {
        self.control = Some(control);
        self
    }

    /// Abort as soon as `cancel` turns true, even mid-cycle.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn next_action_count(&self) -> u32 {
        self.interrupts.next_action_count()
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.interrupts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn system_prompt(&self) -> &str {
        self.prompt.system_prompt()
    }

    /// Run cycles until the agent halts.
    pub async fn run(&mut self) -> HaltReason {
        info!(agent = %self.name, "Starting interaction loop");
        let mut cancel = self.cancel.take();

        let reason = loop {
            let outcome = match cancel.as_mut() {
                Some(cancel) => tokio::select! {
                    outcome = self.step() => Some(outcome),
                    _ = cancelled(cancel) => None,
                },
                None => Some(self.step().await),
            };

            match outcome {
                None => {
                    info!(agent = %self.name, cycle = self.cycle_count, "Agent cancelled");
                    break HaltReason::Cancelled;
                }
                Some(Ok(CycleOutcome::Halted(reason))) => break reason,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(agent = %self.name, error = %e, "Interaction loop failed");
                    break HaltReason::Failed(e.to_string());
                }
            }
        };

        self.cancel = cancel;
        self.events.publish(AgentEvent::Halted {
            agent: self.name.clone(),
            reason: reason.clone(),
            cycles: self.cycle_count,
            timestamp: Utc::now(),
        });
        info!(agent = %self.name, cycles = self.cycle_count, reason = %reason, "Interaction loop stopped");
        reason
    }

    /// Run one cycle.
    pub async fn step(&mut self) -> Result<CycleOutcome> {
        if self.shutdown_requested() {
            info!(agent = %self.name, "Graceful shutdown requested");
            return Ok(CycleOutcome::Halted(HaltReason::Shutdown));
        }

        self.cycle_count += 1;
        let cycle = self.cycle_count;
        self.cycle_log.start_cycle();
        let raw_history: Vec<Value> = self.history.raw().iter().map(Message::raw).collect();
        self.cycle_log.log(cycle, &raw_history, FULL_MESSAGE_HISTORY_FILE_NAME);
        self.events.publish(AgentEvent::CycleStarted {
            agent: self.name.clone(),
            cycle,
            timestamp: Utc::now(),
        });

        let limit = self.config.interaction.continuous_limit;
        if self.interrupts.continuous() && limit > 0 && cycle > limit {
            self.console.say("Continuous Limit Reached: ", &limit.to_string());
            return Ok(CycleOutcome::Halted(HaltReason::ContinuousLimitReached));
        }
        if self.gateway.meter().budget_status() == BudgetStatus::Exceeded {
            warn!(
                agent = %self.name,
                total_cost = self.gateway.meter().total_cost(),
                total_budget = self.gateway.meter().total_budget(),
                "API budget exceeded"
            );
        }

        // Plan
        let reply = match self.think().await {
            Ok(reply) => reply,
            Err(e) => return self.model_failure(e),
        };
        let action = repair_response(&reply, self.gateway.as_ref()).await;
        let action = self.gateway.plugins().post_planning(action);
        self.cycle_log.log(cycle, &action, NEXT_ACTION_FILE_NAME);

        let thoughts = Thoughts::from_action(&action).unwrap_or_default();
        self.show_thoughts(&thoughts);
        let planned = self.plan_command(&action);
        if let Planned::Call(call) = &planned {
            self.console.say(
                "NEXT ACTION: ",
                &format!("COMMAND = {}  ARGUMENTS = {}", call.name, Value::Object(call.args.clone())),
            );
            self.events.publish(AgentEvent::ActionProposed {
                agent: self.name.clone(),
                command: call.name.clone(),
                timestamp: Utc::now(),
            });
        }

        // Authorize
        let asked = !self.interrupts.auto_approved();
        let decision = if asked {
            request_authorization(self.console.as_ref(), &self.config.interaction, &self.name).await
        } else {
            self.console.say(
                "AUTHORISED COMMANDS LEFT: ",
                &self.interrupts.next_action_count().to_string(),
            );
            UserDecision::Approve
        };
        if let UserDecision::ApproveMany(count) = decision {
            self.interrupts.set_next_action_count(count);
        }
        if asked && matches!(decision, UserDecision::Approve | UserDecision::ApproveMany(_)) {
            self.console.say("", "-=-=-=-=-=-=-= COMMAND AUTHORISED BY USER -=-=-=-=-=-=-=");
        }

        // Act
        let started = Instant::now();
        let mut terminal = false;
        let (command_name, success, result) = match decision {
            UserDecision::Exit => {
                self.console.say("", "Exiting...");
                return Ok(CycleOutcome::Halted(HaltReason::UserExit));
            }
            UserDecision::HumanFeedback(input) => {
                self.cycle_log.log_text(cycle, &input, USER_INPUT_FILE_NAME);
                ("human_feedback".to_string(), true, Some(format!("Human feedback: {input}")))
            }
            UserDecision::SelfFeedback => {
                self.console.say(
                    "",
                    "=-=-=-=-= THOUGHTS, REASONING, PLAN AND CRITICISM WILL NOW BE VERIFIED BY THE AGENT =-=-=-=-=",
                );
                let feedback = match self.get_self_feedback(&thoughts).await {
                    Ok(feedback) => feedback,
                    Err(e) => return self.model_failure(e),
                };
                self.console.say("SELF FEEDBACK: ", &feedback);
                ("self_feedback".to_string(), true, Some(format!("Self feedback: {feedback}")))
            }
            UserDecision::Approve | UserDecision::ApproveMany(_) => match planned {
                Planned::Nothing => (String::new(), false, None),
                Planned::Invalid(reason) => (
                    String::new(),
                    false,
                    Some(format!("Could not execute command: {reason}")),
                ),
                Planned::Call(call) => {
                    let (name, success, result, is_terminal) = self.execute(call).await;
                    terminal = is_terminal;
                    (name, success, Some(result))
                }
            },
        };

        if !command_name.is_empty() {
            self.events.publish(AgentEvent::CommandExecuted {
                agent: self.name.clone(),
                command: command_name,
                success,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }

        // Observe
        match result {
            Some(result) => {
                self.console.say("SYSTEM: ", &result);
                self.history.append(Role::System, result, Some(MessageKind::ActionResult));
            }
            None => {
                self.console.say("SYSTEM: ", "Unable to execute command");
                self.history
                    .append(Role::System, "Unable to execute command", Some(MessageKind::ActionResult));
            }
        }
        self.interrupts.consume();

        if terminal {
            return Ok(CycleOutcome::Halted(HaltReason::TaskComplete));
        }
        Ok(CycleOutcome::Continue)
    }

    /// Ask the model to critique `thoughts` in the agent's own role.
    pub async fn get_self_feedback(&mut self, thoughts: &Thoughts) -> Result<String> {
        let prompt = format!(
            "Message from me assuming the role of {} whilst keeping knowledge of my slight limitations as an AI \
             Agent. Evaluate my thought process, reasoning, and plan, and provide a concise paragraph outlining \
             potential improvements. Consider adding or removing ideas that do not align with my role and \
             explaining why, prioritizing thoughts based on their significance, or simply refining my overall \
             thought process.{}",
            self.config.ai.role,
            thoughts.feedback_material()
        );
        let messages = vec![Message::user(prompt)];
        let raw: Vec<Value> = messages.iter().map(Message::raw).collect();
        self.cycle_log
            .log(self.cycle_count, &raw, PROMPT_SUPERVISOR_FEEDBACK_FILE_NAME);

        let model = self.config.llm.fast_model.clone();
        let feedback = self.gateway.chat_completion(messages, &model, None, None).await?;
        self.cycle_log
            .log_text(self.cycle_count, &feedback, SUPERVISOR_FEEDBACK_FILE_NAME);
        Ok(feedback)
    }

    /// Build the prompt, call the model, and record the exchange.
    async fn think(&mut self) -> Result<String> {
        let mut prompt = self.prompt.build(&mut self.history, &self.gateway).await?;
        self.prompt.apply_planning_hooks(&mut prompt, self.gateway.plugins());
        debug!(
            agent = %self.name,
            messages = prompt.len(),
            tokens = token::count_messages_tokens(&prompt),
            "Sending prompt"
        );

        let model = self.config.llm.fast_model.clone();
        let reply = self.gateway.chat_completion(prompt, &model, None, None).await?;

        self.history
            .append(Role::User, self.prompt.triggering_prompt(), None);
        self.history
            .append(Role::Assistant, reply.as_str(), Some(MessageKind::AiResponse));
        Ok(reply)
    }

    /// Extract the command and resolve its path arguments.
    fn plan_command(&self, action: &Value) -> Planned {
        if action.as_object().is_some_and(|o| o.is_empty()) {
            return Planned::Nothing;
        }
        let mut call = match CommandCall::from_action(action) {
            Ok(call) => call,
            Err(reason) => {
                warn!(agent = %self.name, reason = %reason, "Model proposed a malformed command");
                return Planned::Invalid(reason);
            }
        };
        if let Err(e) = self.context.workspace.resolve_pathlike_args(&mut call.args) {
            warn!(agent = %self.name, command = %call.name, error = %e, "Path argument rejected");
            return Planned::Invalid(e.to_string());
        }
        Planned::Call(call)
    }

    /// Dispatch through the registry with the command hooks around it.
    ///
    /// Returns the final command name, whether it completed, the result text
    /// and whether the command ends the run.
    async fn execute(&self, call: CommandCall) -> (String, bool, String, bool) {
        let plugins = self.gateway.plugins();
        let (name, args) = plugins.pre_command(call.name, call.args);

        let outcome = self.registry.call(&name, args, &self.context).await;
        let success = outcome.is_completed();
        let output = outcome.into_text();

        let result_tokens = token::count_string_tokens(&output);
        let summary_tokens = token::count_string_tokens(&self.history.summary_message().content);
        let result = if result_tokens + summary_tokens + RESULT_SAFETY_MARGIN > self.config.llm.fast_token_limit {
            warn!(
                agent = %self.name,
                command = %name,
                result_tokens,
                "Command output too large for the context window"
            );
            format!("Failure: {name} returned too much output.")
        } else {
            format!("Command {name} returned: {output}")
        };
        let result = plugins.post_command(&name, result);

        let terminal = success && self.registry.get(&name).is_some_and(|c| c.is_terminal());
        (name, success, result, terminal)
    }

    fn show_thoughts(&self, thoughts: &Thoughts) {
        let name = self.name.to_uppercase();
        self.console.say(&format!("{name} THOUGHTS:"), &thoughts.text);
        self.console.say("REASONING:", &thoughts.reasoning);
        if !thoughts.plan.is_empty() {
            self.console.say("PLAN:", &thoughts.plan);
        }
        self.console.say("CRITICISM:", &thoughts.criticism);
        if !thoughts.speak.is_empty() {
            self.console.say("SPEAK:", &thoughts.speak);
        }
    }

    /// A failed model call skips the cycle unless it signals misconfiguration.
    fn model_failure(&self, e: Error) -> Result<CycleOutcome> {
        if e.is_fatal() {
            return Err(e);
        }
        warn!(agent = %self.name, cycle = self.cycle_count, error = %e, "Model call failed, skipping cycle");
        self.events.publish(AgentEvent::ModelCallFailed {
            agent: self.name.clone(),
            error_message: e.to_string(),
            timestamp: Utc::now(),
        });
        Ok(CycleOutcome::Skipped)
    }

    fn shutdown_requested(&mut self) -> bool {
        let Some(control) = self.control.as_mut() else {
            return false;
        };
        matches!(control.try_recv(), Ok(ControlMessage::Shutdown))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("cycle_count", &self.cycle_count)
            .field("history", &self.history.len())
            .field("next_action_count", &self.interrupts.next_action_count())
            .finish()
    }
}

/// Resolves once the flag turns true. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
