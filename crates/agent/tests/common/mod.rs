//! Helpers shared by the agent integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ironloop_agent::{Agent, Console, ScriptedConsole};
use ironloop_config::AppConfig;
use ironloop_core::command::CommandRegistry;
use ironloop_core::error::ProviderError;
use ironloop_core::message::{Message, MessageKind};
use ironloop_core::plugin::PluginBus;
use ironloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use ironloop_providers::ModelGateway;
use ironloop_security::Workspace;
use ironloop_telemetry::BudgetMeter;
use tempfile::TempDir;

/// Replays scripted replies and answers `{}` once they run out.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<usize>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// The last message of every request.
    pub fn prompts(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        // Give other tasks (and cancellation) a chance between calls.
        tokio::task::yield_now().await;
        *self.calls.lock().unwrap() += 1;
        let model = request.model.clone();
        self.seen.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("{}".into()))?;
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

/// A console whose prompts never get an answer.
pub struct SilentConsole;

#[async_trait]
impl Console for SilentConsole {
    fn say(&self, _title: &str, _content: &str) {}

    fn warn(&self, _text: &str) {}

    async fn read_line(&self, _label: &str) -> Option<String> {
        std::future::pending().await
    }
}

/// Configuration with retries off, for tests.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.num_retries = 0;
    config.ai.name = "Scout".into();
    config.ai.role = "an agent that tidies up workspaces".into();
    config.ai.goals = vec!["List the workspace".into()];
    config
}

/// A command reply the model might send.
pub fn action(name: &str, args: serde_json::Value) -> Result<String, ProviderError> {
    Ok(serde_json::json!({
        "thoughts": {
            "text": format!("I should run {name}"),
            "reasoning": "It moves the task forward",
            "plan": "- run it\n- look at the result",
            "criticism": "Keep it short",
            "speak": "Running a command"
        },
        "command": {"name": name, "args": args}
    })
    .to_string())
}

pub struct Harness {
    pub dir: TempDir,
    pub provider: Arc<ScriptedProvider>,
    pub console: Arc<ScriptedConsole>,
    pub agent: Agent,
}

impl Harness {
    /// The content of every system message recorded so far.
    pub fn results(&self) -> Vec<String> {
        self.agent
            .history()
            .raw()
            .iter()
            .filter(|m| m.kind == Some(MessageKind::ActionResult))
            .map(|m| m.content.clone())
            .collect()
    }
}

pub struct HarnessBuilder {
    config: AppConfig,
    registry: CommandRegistry,
    plugins: PluginBus,
    replies: Vec<Result<String, ProviderError>>,
    inputs: Vec<String>,
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        config: test_config(),
        registry: ironloop_tools::default_registry(),
        plugins: PluginBus::new(),
        replies: Vec::new(),
        inputs: Vec::new(),
    }
}

impl HarnessBuilder {
    pub fn config(mut self, edit: impl FnOnce(&mut AppConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn registry(mut self, edit: impl FnOnce(&mut CommandRegistry)) -> Self {
        edit(&mut self.registry);
        self
    }

    pub fn plugins(mut self, plugins: PluginBus) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn replies(mut self, replies: Vec<Result<String, ProviderError>>) -> Self {
        self.replies = replies;
        self
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> Harness {
        let console = Arc::new(ScriptedConsole::new(self.inputs.clone()));
        let (dir, provider, agent) = self.build_agent(console.clone());
        Harness {
            dir,
            provider,
            console,
            agent,
        }
    }

    /// Build just the agent, talking to `console`.
    pub fn build_agent(self, console: Arc<dyn Console>) -> (TempDir, Arc<ScriptedProvider>, Agent) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = self.config;
        config.workspace.path = Some(dir.path().to_path_buf());
        config.logging.log_dir = dir.path().join("logs");
        let config = Arc::new(config);

        let provider = ScriptedProvider::new(self.replies);
        let meter = Arc::new(BudgetMeter::from_config(&config));
        let gateway = ModelGateway::new(provider.clone(), meter, &config).with_plugins(Arc::new(self.plugins));
        let workspace = Workspace::new(dir.path(), config.workspace.restrict_to_workspace).unwrap();

        let agent = Agent::new(
            config,
            Arc::new(gateway),
            Arc::new(self.registry),
            Arc::new(workspace),
            console,
        );
        (dir, provider, agent)
    }
}
