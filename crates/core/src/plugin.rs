//! Plugin hooks: extension points along the interaction loop.
//!
//! A plugin implements only the hooks it cares about. For every hook point
//! the bus first asks `can_handle_*` and only then calls the handler,
//! threading the payload through plugins in registration order. Order is
//! therefore part of the contract: each plugin sees the previous plugin's
//! output.

use std::sync::Arc;

use async_trait::async_trait;
use ironloop_config::PluginsConfig;
use serde_json::Value;
use tracing::{debug, info};

use crate::action::CommandArgs;
use crate::message::Message;
use crate::provider::ProviderRequest;

/// An extension that can observe or rewrite data moving through the loop.
///
/// Every hook defaults to "not handled".
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle_post_planning(&self) -> bool {
        false
    }

    /// Rewrite the repaired action before its command is extracted.
    fn post_planning(&self, action: Value) -> Value {
        action
    }

    fn can_handle_pre_command(&self) -> bool {
        false
    }

    /// Rewrite the command name and arguments before dispatch.
    fn pre_command(&self, name: String, args: CommandArgs) -> (String, CommandArgs) {
        (name, args)
    }

    fn can_handle_post_command(&self) -> bool {
        false
    }

    /// Rewrite a command's textual result.
    fn post_command(&self, _name: &str, result: String) -> String {
        result
    }

    fn can_handle_on_response(&self) -> bool {
        false
    }

    /// Rewrite the model's raw reply text.
    fn on_response(&self, response: String) -> String {
        response
    }

    fn can_handle_on_planning(&self) -> bool {
        false
    }

    /// Extra context to add to the prompt, as a system message.
    fn on_planning(&self, _messages: &[Message]) -> Option<String> {
        None
    }

    fn can_handle_chat_completion(&self, _request: &ProviderRequest) -> bool {
        false
    }

    /// Answer a chat request in place of the model.
    async fn chat_completion(&self, _request: &ProviderRequest) -> Option<String> {
        None
    }
}

/// A payload in transit through one of the transforming hook points.
#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    PostPlanning(Value),
    PreCommand { name: String, args: CommandArgs },
    PostCommand { name: String, result: String },
    OnResponse(String),
}

/// Ordered set of plugins. Read-only once the loop starts.
#[derive(Clone, Default)]
pub struct PluginBus {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the candidates permitted by the allow/deny lists, in order.
    ///
    /// Denylisted names are always dropped. A non-empty allowlist admits
    /// only the names it contains.
    pub fn from_candidates(candidates: Vec<Arc<dyn Plugin>>, config: &PluginsConfig) -> Self {
        let mut bus = Self::new();
        for plugin in candidates {
            let name = plugin.name();
            if config.denylist.iter().any(|d| d == name) {
                info!(plugin = %name, "Plugin is denylisted, skipping");
                continue;
            }
            if !config.allowlist.is_empty() && !config.allowlist.iter().any(|a| a == name) {
                info!(plugin = %name, "Plugin is not allowlisted, skipping");
                continue;
            }
            bus.register(plugin);
        }
        bus
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        debug!(plugin = %plugin.name(), position = self.plugins.len(), "Registered plugin");
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Thread `hook` through every capable plugin in registration order.
    pub fn dispatch(&self, hook: Hook) -> Hook {
        match hook {
            Hook::PostPlanning(action) => Hook::PostPlanning(self.post_planning(action)),
            Hook::PreCommand { name, args } => {
                let (name, args) = self.pre_command(name, args);
                Hook::PreCommand { name, args }
            }
            Hook::PostCommand { name, result } => {
                let result = self.post_command(&name, result);
                Hook::PostCommand { name, result }
            }
            Hook::OnResponse(text) => Hook::OnResponse(self.on_response(text)),
        }
    }

    pub fn post_planning(&self, action: Value) -> Value {
        self.plugins
            .iter()
            .filter(|p| p.can_handle_post_planning())
            .fold(action, |action, p| p.post_planning(action))
    }

    pub fn pre_command(&self, name: String, args: CommandArgs) -> (String, CommandArgs) {
        self.plugins
            .iter()
            .filter(|p| p.can_handle_pre_command())
            .fold((name, args), |(name, args), p| p.pre_command(name, args))
    }

    pub fn post_command(&self, name: &str, result: String) -> String {
        self.plugins
            .iter()
            .filter(|p| p.can_handle_post_command())
            .fold(result, |result, p| p.post_command(name, result))
    }

    pub fn on_response(&self, text: String) -> String {
        self.plugins
            .iter()
            .filter(|p| p.can_handle_on_response())
            .fold(text, |text, p| p.on_response(text))
    }

    /// The first capable plugin returning non-empty text answers the request.
    pub async fn chat_completion(&self, request: &ProviderRequest) -> Option<String> {
        for plugin in &self.plugins {
            if !plugin.can_handle_chat_completion(request) {
                continue;
            }
            if let Some(text) = plugin.chat_completion(request).await {
                if !text.is_empty() {
                    debug!(plugin = %plugin.name(), "Plugin answered chat completion");
                    return Some(text);
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for PluginBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBus").field("plugins", &self.names()).finish()
    }
}
