//! Conversation history with a rolling summary.
//!
//! Messages are append-only. When older cycles no longer fit in the prompt,
//! they are folded into a running summary written by the model. Folding is
//! incremental: each message is summarized at most once, and asking again
//! over an unchanged range returns the cached summary without a model call.

use ironloop_core::error::Result;
use ironloop_core::message::{Message, MessageKind, Role};
use ironloop_core::token;
use ironloop_providers::ModelGateway;
use serde_json::{Value, json};
use tracing::debug;

/// What the summary says before anything has happened.
pub const INITIAL_SUMMARY: &str = "I was created";

/// One loop iteration's worth of messages: `(user?, assistant?, result?)`.
#[derive(Debug, Clone, Copy)]
pub struct Cycle<'a> {
    /// Index of the first message in the history.
    pub start: usize,
    pub messages: &'a [Message],
}

impl<'a> Cycle<'a> {
    pub fn end(&self) -> usize {
        self.start + self.messages.len()
    }

    pub fn user(&self) -> Option<&'a Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    pub fn assistant(&self) -> Option<&'a Message> {
        self.messages.iter().find(|m| m.role == Role::Assistant)
    }

    pub fn result(&self) -> Option<&'a Message> {
        self.messages.iter().find(|m| m.role == Role::System)
    }

    pub fn tokens(&self) -> usize {
        token::count_messages_tokens(self.messages)
    }
}

/// The agent's message log.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    summary: String,
    /// Messages before this index are already part of `summary`.
    summarized_upto: usize,
    max_summary_tokens: usize,
}

impl History {
    pub fn new(max_summary_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            summary: INITIAL_SUMMARY.to_string(),
            summarized_upto: 0,
            max_summary_tokens,
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>, kind: Option<MessageKind>) {
        let mut message = Message::new(role, content);
        message.kind = kind;
        self.messages.push(message);
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Every message, in conversation order.
    pub fn raw(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn max_summary_tokens(&self) -> usize {
        self.max_summary_tokens
    }

    /// The summary as the system message placed after the system prompt.
    pub fn summary_message(&self) -> Message {
        Message::system(format!(
            "This reminds you of these events from your past: \n{}",
            self.summary
        ))
    }

    /// The most recent assistant reply, if any.
    pub fn last_ai_response(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == Some(MessageKind::AiResponse))
    }

    /// Group messages into cycles, oldest first.
    pub fn per_cycle(&self) -> Vec<Cycle<'_>> {
        let messages = &self.messages;
        let mut cycles = Vec::new();
        let mut i = 0;
        while i < messages.len() {
            let start = i;
            if messages[i].role == Role::User {
                i += 1;
            }
            if i < messages.len() && messages[i].role == Role::Assistant {
                i += 1;
            }
            if i < messages.len() && messages[i].role == Role::System {
                i += 1;
            }
            cycles.push(Cycle {
                start,
                messages: &messages[start..i],
            });
        }
        cycles
    }

    /// Fold every message before `upto` into the running summary.
    ///
    /// Only messages not folded in by an earlier call are sent to the model.
    pub async fn update_running_summary(&mut self, upto: usize, gateway: &ModelGateway) -> Result<Message> {
        let upto = upto.min(self.messages.len());
        if upto <= self.summarized_upto {
            return Ok(self.summary_message());
        }

        let events = summarizable_events(&self.messages[self.summarized_upto..upto]);
        if events.is_empty() {
            self.summarized_upto = upto;
            return Ok(self.summary_message());
        }

        debug!(
            from = self.summarized_upto,
            to = upto,
            events = events.len(),
            "Updating running summary"
        );
        let prompt = summary_prompt(&self.summary, &events);
        let model = gateway.llm().fast_model.clone();
        let summary = gateway
            .chat_completion(
                vec![Message::user(prompt)],
                &model,
                None,
                u32::try_from(self.max_summary_tokens).ok(),
            )
            .await?;

        self.summary = summary;
        self.summarized_upto = upto;
        Ok(self.summary_message())
    }
}

/// Reduce messages to what is worth summarizing.
///
/// User messages are dropped. Assistant replies keep only their command.
fn summarizable_events(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            Role::User => None,
            Role::Assistant => Some(json!({"role": "you", "content": command_only(&m.content)})),
            Role::System => Some(json!({"role": "your computer", "content": m.content})),
        })
        .collect()
}

fn command_only(reply: &str) -> String {
    match crate::repair::parse_locally(reply) {
        Some(Value::Object(mut object)) => {
            object.remove("thoughts");
            Value::Object(object).to_string()
        }
        _ => reply.to_string(),
    }
}

fn summary_prompt(current: &str, events: &[Value]) -> String {
    let events = Value::Array(events.to_vec()).to_string();
    format!(
        "Your task is to create a concise running summary of actions and information results in the \
provided text, focusing on key and potentially important information to remember.\n\n\
You will receive the current summary and your latest actions. Combine them, adding relevant key \
information from the latest development in 1st person past tense and keeping the summary concise.\n\n\
Summary So Far:\n\"\"\"\n{current}\n\"\"\"\n\n\
Latest Development:\n\"\"\"\n{events}\n\"\"\"\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, gateway};

    fn cycle(history: &mut History, reply: &str, result: &str) {
        history.append(Role::User, "Determine exactly one command to use", None);
        history.append(Role::Assistant, reply, Some(MessageKind::AiResponse));
        history.append(Role::System, result, Some(MessageKind::ActionResult));
    }

    #[test]
    fn groups_messages_into_cycles() {
        let mut history = History::new(100);
        cycle(&mut history, "{}", "Command a returned: 1");
        cycle(&mut history, "{}", "Command b returned: 2");
        history.append(Role::System, "Human feedback: stop", Some(MessageKind::ActionResult));

        let cycles = history.per_cycle();
        assert_eq!(cycles.len(), 3);
        assert_eq!(cycles[1].start, 3);
        assert_eq!(cycles[1].result().unwrap().content, "Command b returned: 2");
        assert!(cycles[2].user().is_none());
        assert_eq!(cycles[2].end(), history.len());
    }

    #[test]
    fn starts_with_initial_summary() {
        let history = History::new(100);
        assert_eq!(history.summary(), INITIAL_SUMMARY);
        assert!(history.summary_message().content.ends_with("\nI was created"));
    }

    #[test]
    fn assistant_reply_reduced_to_command() {
        let reply = r#"{"thoughts": {"text": "secret"}, "command": {"name": "read_file", "args": {}}}"#;
        let events = summarizable_events(&[
            Message::user("prompt"),
            Message::assistant(reply),
            Message::system("Command read_file returned: hi"),
        ]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["role"], "you");
        assert!(!events[0]["content"].as_str().unwrap().contains("secret"));
        assert_eq!(events[1]["role"], "your computer");
    }

    #[tokio::test]
    async fn summary_is_cached_for_unchanged_range() {
        let provider = ScriptedProvider::new(vec![Ok("I listed files.".into())]);
        let gateway = gateway(provider.clone());
        let mut history = History::new(100);
        cycle(&mut history, r#"{"command": {"name": "list_files", "args": {}}}"#, "Command list_files returned: []");

        let first = history.update_running_summary(3, &gateway).await.unwrap();
        assert!(first.content.ends_with("I listed files."));
        assert_eq!(provider.calls(), 1);

        let second = history.update_running_summary(3, &gateway).await.unwrap();
        assert_eq!(second.content, first.content);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn only_new_events_are_sent() {
        let provider = ScriptedProvider::new(vec![Ok("one".into()), Ok("two".into())]);
        let gateway = gateway(provider.clone());
        let mut history = History::new(100);
        cycle(&mut history, "{}", "Command first returned: 1");
        cycle(&mut history, "{}", "Command second returned: 2");

        history.update_running_summary(3, &gateway).await.unwrap();
        history.update_running_summary(6, &gateway).await.unwrap();

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Summary So Far:\n\"\"\"\none\n\"\"\""));
        assert!(prompts[1].contains("Command second returned"));
        assert!(!prompts[1].contains("Command first returned"));
        assert_eq!(history.summary(), "two");
    }

    #[tokio::test]
    async fn user_only_range_needs_no_model() {
        let provider = ScriptedProvider::new(vec![]);
        let gateway = gateway(provider.clone());
        let mut history = History::new(100);
        history.append(Role::User, "hello", None);

        let message = history.update_running_summary(1, &gateway).await.unwrap();
        assert!(message.content.ends_with(INITIAL_SUMMARY));
        assert_eq!(provider.calls(), 0);
    }
}
