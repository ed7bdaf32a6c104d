//! Prompt construction.
//!
//! The system prompt is generated once per agent from its profile and the
//! enabled commands. Each cycle's prompt then wraps the recent history:
//!
//! ```text
//! system prompt
//! running summary          (older cycles, folded)
//! recent cycles            (as many as fit)
//! current time and date
//! remaining budget         (only when a budget is set)
//! plugin planning notes    (on_planning hooks)
//! triggering prompt        (user)
//! ```

use chrono::Local;
use ironloop_config::{AiProfile, AppConfig};
use ironloop_core::command::CommandRegistry;
use ironloop_core::error::Result;
use ironloop_core::message::Message;
use ironloop_core::plugin::PluginBus;
use ironloop_core::token;
use ironloop_providers::ModelGateway;
use serde_json::json;
use tracing::debug;

use crate::history::History;

/// Goals beyond this many are left out of the system prompt.
pub const MAX_GOALS: usize = 5;

/// Builder for the constraints/commands/resources section of the system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptGenerator {
    constraints: Vec<String>,
    commands: Vec<String>,
    resources: Vec<String>,
    performance_evaluations: Vec<String>,
}

impl PromptGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock constraints, resources and evaluations, with no commands.
    pub fn with_defaults() -> Self {
        let mut generator = Self::new();
        generator.add_constraint(
            "~4000 word limit for short term memory. Your short term memory is short, so immediately save \
             important information to files.",
        );
        generator.add_constraint(
            "If you are unsure how you previously did something or want to recall past events, thinking about \
             similar events will help you remember.",
        );
        generator.add_constraint("No user assistance");
        generator.add_constraint("Exclusively use the commands listed below e.g. command_name");

        generator.add_resource("File input and output inside your workspace.");
        generator.add_resource("The results of previous commands, summarized when they grow old.");

        generator.add_performance_evaluation(
            "Continuously review and analyze your actions to ensure you are performing to the best of your abilities.",
        );
        generator.add_performance_evaluation("Constructively self-criticize your big-picture behavior constantly.");
        generator.add_performance_evaluation("Reflect on past decisions and strategies to refine your approach.");
        generator.add_performance_evaluation(
            "Every command has a cost, so be smart and efficient. Aim to complete tasks in the least number of steps.",
        );
        generator.add_performance_evaluation("Write all code to a file.");
        generator
    }

    pub fn add_constraint(&mut self, constraint: impl Into<String>) {
        self.constraints.push(constraint.into());
    }

    /// Add one command line, as rendered by `Command::prompt_line`.
    pub fn add_command(&mut self, line: impl Into<String>) {
        self.commands.push(line.into());
    }

    pub fn add_resource(&mut self, resource: impl Into<String>) {
        self.resources.push(resource.into());
    }

    pub fn add_performance_evaluation(&mut self, evaluation: impl Into<String>) {
        self.performance_evaluations.push(evaluation.into());
    }

    pub fn generate(&self) -> String {
        let format = serde_json::to_string_pretty(&response_format()).unwrap_or_default();
        format!(
            "Constraints:\n{}\n\nCommands:\n{}\n\nResources:\n{}\n\nPerformance Evaluation:\n{}\n\n\
             You should only respond in JSON format as described below \nResponse Format: \n{format} \n\
             Ensure the response can be parsed by a standard JSON parser",
            numbered(&self.constraints),
            numbered(&self.commands),
            numbered(&self.resources),
            numbered(&self.performance_evaluations),
        )
    }
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn response_format() -> serde_json::Value {
    json!({
        "thoughts": {
            "text": "thought",
            "reasoning": "reasoning",
            "plan": "- short bulleted\n- list that conveys\n- long-term plan",
            "criticism": "constructive self-criticism",
            "speak": "thoughts summary to say to user"
        },
        "command": {"name": "command name", "args": {"arg name": "value"}}
    })
}

/// The full system prompt for `profile`, listing every command enabled under `config`.
pub fn construct_full_prompt(profile: &AiProfile, registry: &CommandRegistry, config: &AppConfig) -> String {
    let mut generator = PromptGenerator::with_defaults();
    for command in registry.enabled(config) {
        generator.add_command(command.prompt_line());
    }

    let mut prompt = format!(
        "You are {}, {}\nYour decisions must always be made independently without seeking user assistance. \
         Play to your strengths as an LLM and pursue simple strategies with no legal complications.\n\nGOALS:\n\n",
        profile.name, profile.role
    );
    for (i, goal) in profile.goals.iter().take(MAX_GOALS).enumerate() {
        prompt.push_str(&format!("{}. {goal}\n", i + 1));
    }
    prompt.push_str(&format!("\n\n{}", generator.generate()));
    prompt
}

/// Assembles each cycle's prompt.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    triggering_prompt: String,
    send_token_limit: usize,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, triggering_prompt: impl Into<String>, send_token_limit: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            triggering_prompt: triggering_prompt.into(),
            send_token_limit,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn triggering_prompt(&self) -> &str {
        &self.triggering_prompt
    }

    pub fn send_token_limit(&self) -> usize {
        self.send_token_limit
    }

    /// Build the prompt, folding cycles that do not fit into the running summary.
    pub async fn build(&self, history: &mut History, gateway: &ModelGateway) -> Result<Vec<Message>> {
        let system = Message::system(self.system_prompt.as_str());
        let trigger = Message::user(self.triggering_prompt.as_str());

        let mut appended = vec![Message::system(format!(
            "The current time and date is {}",
            Local::now().format("%c")
        ))];
        if let Some(budget) = gateway.meter().budget_status().message() {
            appended.push(Message::system(budget));
        }

        let reserved = token::count_message_tokens(&system)
            + history.max_summary_tokens()
            + token::count_messages_tokens(&appended)
            + token::count_message_tokens(&trigger);
        let available = self.send_token_limit.saturating_sub(reserved);

        let mut used = 0;
        let mut kept_from = history.len();
        for cycle in history.per_cycle().iter().rev() {
            let tokens = cycle.tokens();
            if used + tokens > available {
                break;
            }
            used += tokens;
            kept_from = cycle.start;
        }
        debug!(
            kept = history.len() - kept_from,
            trimmed = kept_from,
            tokens = used,
            "Fitted history into prompt"
        );

        let summary = history.update_running_summary(kept_from, gateway).await?;

        let mut prompt = Vec::with_capacity(3 + history.len() - kept_from + appended.len());
        prompt.push(system);
        prompt.push(summary);
        prompt.extend(history.raw()[kept_from..].iter().cloned());
        prompt.extend(appended);
        prompt.push(trigger);
        Ok(prompt)
    }

    /// Let `on_planning` plugins add system messages just before the triggering prompt.
    ///
    /// Stops at the first response that would push the prompt past the send limit.
    pub fn apply_planning_hooks(&self, prompt: &mut Vec<Message>, plugins: &PluginBus) {
        let mut used = token::count_messages_tokens(prompt);
        let total = plugins.len();
        for (i, plugin) in plugins.plugins().iter().enumerate() {
            if !plugin.can_handle_on_planning() {
                continue;
            }
            let Some(text) = plugin.on_planning(prompt) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            let message = Message::system(text);
            let tokens = token::count_message_tokens(&message);
            if used + tokens > self.send_token_limit {
                debug!(
                    plugin = %plugin.name(),
                    remaining = total - i,
                    "Plugin planning response too long, skipping the rest"
                );
                break;
            }
            let at = prompt.len().saturating_sub(1);
            prompt.insert(at, message);
            used += tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, gateway};
    use ironloop_core::command::FnCommand;
    use ironloop_core::message::{MessageKind, Role};
    use ironloop_core::plugin::Plugin;
    use std::sync::Arc;

    fn fill(history: &mut History, cycles: usize, size: usize) {
        for i in 0..cycles {
            history.append(Role::User, "next", None);
            history.append(Role::Assistant, "x".repeat(size), Some(MessageKind::AiResponse));
            history.append(Role::System, format!("Command c{i} returned: ok"), Some(MessageKind::ActionResult));
        }
    }

    #[test]
    fn full_prompt_lists_profile_goals_and_commands() {
        let profile = AiProfile {
            name: "Scout".into(),
            role: "an explorer".into(),
            goals: (1..=7).map(|i| format!("goal {i}")).collect(),
        };
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(FnCommand::new("visible", "Shown", |_, _| async { Ok(String::new()) })));
        registry.register(Box::new(
            FnCommand::new("hidden", "Not shown", |_, _| async { Ok(String::new()) }).enabled(false),
        ));

        let prompt = construct_full_prompt(&profile, &registry, &AppConfig::default());
        assert!(prompt.starts_with("You are Scout, an explorer\n"));
        assert!(prompt.contains("5. goal 5\n"));
        assert!(!prompt.contains("goal 6"));
        assert!(prompt.contains("1. visible: Shown, args: "));
        assert!(!prompt.contains("hidden"));
        assert!(prompt.contains("\"command\": {"));
    }

    #[tokio::test]
    async fn layout_when_everything_fits() {
        let provider = ScriptedProvider::new(vec![]);
        let gateway = gateway(provider.clone());
        let mut history = History::new(50);
        fill(&mut history, 2, 10);

        let builder = PromptBuilder::new("SYSTEM", "TRIGGER", 3000);
        let prompt = builder.build(&mut history, &gateway).await.unwrap();

        assert_eq!(prompt.len(), 2 + 6 + 1 + 1);
        assert_eq!(prompt[0].content, "SYSTEM");
        assert!(prompt[1].content.starts_with("This reminds you of these events from your past:"));
        assert_eq!(prompt[2].content, "next");
        assert!(prompt[8].content.starts_with("The current time and date is "));
        assert_eq!(prompt[9].role, Role::User);
        assert_eq!(prompt[9].content, "TRIGGER");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn budget_message_only_with_budget() {
        let provider = ScriptedProvider::new(vec![]);
        let gateway = gateway(provider);
        let builder = PromptBuilder::new("SYSTEM", "TRIGGER", 3000);

        let prompt = builder.build(&mut History::new(50), &gateway).await.unwrap();
        assert!(!prompt.iter().any(|m| m.content.contains("API budget")));

        gateway.meter().set_budget(1.0);
        let prompt = builder.build(&mut History::new(50), &gateway).await.unwrap();
        let budget = &prompt[prompt.len() - 2];
        assert_eq!(budget.content, "Your remaining API budget is $1.000");
    }

    #[tokio::test]
    async fn overflowing_cycles_are_summarized() {
        let provider = ScriptedProvider::new(vec![Ok("I did a lot.".into())]);
        let gateway = gateway(provider.clone());
        let mut history = History::new(50);
        // Each cycle is roughly 215 tokens; only the newest fits.
        fill(&mut history, 3, 800);

        let builder = PromptBuilder::new("SYSTEM", "TRIGGER", 500);
        let prompt = builder.build(&mut history, &gateway).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert!(prompt[1].content.ends_with("I did a lot."));
        assert_eq!(prompt.len(), 2 + 3 + 1 + 1);
        assert_eq!(prompt[4].content, "Command c2 returned: ok");
    }

    struct Planner {
        note: String,
    }

    impl Plugin for Planner {
        fn name(&self) -> &str {
            &self.note
        }

        fn can_handle_on_planning(&self) -> bool {
            true
        }

        fn on_planning(&self, _messages: &[Message]) -> Option<String> {
            Some(self.note.clone())
        }
    }

    #[test]
    fn planning_notes_go_before_trigger_until_full() {
        let mut plugins = PluginBus::new();
        plugins.register(Arc::new(Planner { note: "short note".into() }));
        plugins.register(Arc::new(Planner { note: "y".repeat(400) }));
        plugins.register(Arc::new(Planner { note: "never reached".into() }));

        let builder = PromptBuilder::new("SYSTEM", "TRIGGER", 60);
        let mut prompt = vec![Message::system("SYSTEM"), Message::user("TRIGGER")];
        builder.apply_planning_hooks(&mut prompt, &plugins);

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["SYSTEM", "short note", "TRIGGER"]);
    }
}
