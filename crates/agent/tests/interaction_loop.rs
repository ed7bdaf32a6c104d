//! End-to-end cycles through the real command registry.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{action, harness};
use ironloop_agent::CycleOutcome;
use ironloop_core::command::{CommandArgs, FnCommand};
use ironloop_core::error::{CommandError, ProviderError};
use ironloop_core::event::{AgentEvent, HaltReason};
use ironloop_core::message::Role;
use ironloop_core::plugin::{Plugin, PluginBus};
use serde_json::{Value, json};

#[tokio::test]
async fn preapproved_command_runs_without_asking() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![Ok(r#"{"command":{"name":"list_files","args":{"directory":""}}}"#.into())])
        .build();
    std::fs::write(h.dir.path().join("notes.txt"), "hello").unwrap();

    let outcome = h.agent.step().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Continue);
    assert_eq!(h.console.prompts(), 0);
    assert_eq!(h.agent.next_action_count(), 0);
    let results = h.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].starts_with("Command list_files returned: "));
    assert!(results[0].contains("notes.txt"));
    assert!(h.console.saw("AUTHORISED COMMANDS LEFT: "));
}

#[tokio::test]
async fn history_records_trigger_reply_and_result() {
    let reply = action("list_files", json!({"directory": "/"}));
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![reply.clone()])
        .build();

    h.agent.step().await.unwrap();

    let messages = h.agent.history().raw();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, reply.unwrap());
    assert_eq!(messages[2].role, Role::System);
}

#[tokio::test]
async fn continuous_mode_stops_at_the_limit() {
    let mut h = harness()
        .config(|c| {
            c.interaction.continuous_mode = true;
            c.interaction.continuous_limit = 2;
        })
        .replies(vec![
            action("list_files", json!({"directory": ""})),
            action("list_files", json!({"directory": ""})),
        ])
        .build();

    let reason = h.agent.run().await;

    assert_eq!(reason, HaltReason::ContinuousLimitReached);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.results().len(), 2);
    assert_eq!(h.console.prompts(), 0);
    assert!(h.console.saw("Continuous Limit Reached: "));
}

#[tokio::test]
async fn failing_command_is_reported_and_the_loop_goes_on() {
    let mut h = harness()
        .config(|c| {
            c.interaction.continuous_mode = true;
            c.interaction.continuous_limit = 2;
        })
        .registry(|r| {
            r.register(Box::new(FnCommand::new("explode", "Always fails", |_args, _ctx| async {
                Err(CommandError::ExecutionFailed("boom".into()))
            })));
        })
        .replies(vec![action("explode", json!({})), action("explode", json!({}))])
        .build();

    let reason = h.agent.run().await;

    assert_eq!(reason, HaltReason::ContinuousLimitReached);
    assert_eq!(
        h.results(),
        vec!["Command explode returned: Error: boom", "Command explode returned: Error: boom"]
    );
}

#[tokio::test]
async fn disabled_command_explains_itself() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![action("execute_shell", json!({"command_line": "ls"}))])
        .build();

    h.agent.step().await.unwrap();

    let result = &h.results()[0];
    assert!(result.starts_with("Command execute_shell returned: "));
    assert!(result.contains("not allowed to run local shell commands"));
}

#[tokio::test]
async fn unknown_command_points_at_the_command_list() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![action("fly_to_moon", json!({}))])
        .build();

    h.agent.step().await.unwrap();

    assert!(h.results()[0].contains("Unknown command 'fly_to_moon'"));
}

#[tokio::test]
async fn human_feedback_replaces_the_command() {
    let mut h = harness()
        .replies(vec![action(
            "write_to_file",
            json!({"filename": "plan.txt", "text": "draft"}),
        )])
        .inputs(&["Please read the notes first"])
        .build();

    let outcome = h.agent.step().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Continue);
    assert_eq!(h.console.prompts(), 1);
    assert!(!h.dir.path().join("plan.txt").exists());
    assert_eq!(h.results(), vec!["Human feedback: Please read the notes first"]);
}

#[tokio::test]
async fn self_feedback_asks_the_model_to_critique() {
    let mut h = harness()
        .replies(vec![
            action("list_files", json!({"directory": ""})),
            Ok("Check the goals before listing files.".into()),
        ])
        .inputs(&["s"])
        .build();

    h.agent.step().await.unwrap();

    let prompts = h.provider.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].starts_with("Message from me assuming the role of an agent that tidies up workspaces"));
    assert!(prompts[1].contains("It moves the task forward"));
    assert_eq!(h.results(), vec!["Self feedback: Check the goals before listing files."]);
    assert!(h.console.saw("SELF FEEDBACK: "));
}

#[tokio::test]
async fn exit_key_halts_without_recording_a_result() {
    let mut h = harness()
        .replies(vec![action("list_files", json!({"directory": ""}))])
        .inputs(&["n"])
        .build();

    let outcome = h.agent.step().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Halted(HaltReason::UserExit));
    assert!(h.results().is_empty());
}

#[tokio::test]
async fn end_of_input_is_an_exit() {
    let mut h = harness()
        .replies(vec![action("list_files", json!({"directory": ""}))])
        .build();

    assert_eq!(h.agent.run().await, HaltReason::UserExit);
}

#[tokio::test]
async fn batch_approval_covers_the_following_cycles() {
    let mut h = harness()
        .replies(vec![
            action("list_files", json!({"directory": ""})),
            action("list_files", json!({"directory": ""})),
        ])
        .inputs(&["y -3"])
        .build();

    h.agent.step().await.unwrap();
    assert_eq!(h.agent.next_action_count(), 2);

    h.agent.step().await.unwrap();
    assert_eq!(h.agent.next_action_count(), 1);
    assert_eq!(h.console.prompts(), 1);
}

#[tokio::test]
async fn invalid_input_asks_again() {
    let mut h = harness()
        .replies(vec![action("list_files", json!({"directory": ""}))])
        .inputs(&["", "y -many", "y"])
        .build();

    h.agent.step().await.unwrap();

    assert_eq!(h.console.prompts(), 3);
    assert_eq!(h.console.warnings().len(), 2);
    assert!(
        h.console
            .transcript()
            .iter()
            .any(|(_, content)| content.contains("COMMAND AUTHORISED BY USER"))
    );
    assert_eq!(h.results().len(), 1);
}

#[tokio::test]
async fn task_complete_ends_the_run() {
    let mut h = harness()
        .config(|c| c.interaction.continuous_mode = true)
        .replies(vec![action("task_complete", json!({"reason": "all goals met"}))])
        .build();

    let reason = h.agent.run().await;

    assert_eq!(reason, HaltReason::TaskComplete);
    assert_eq!(h.results(), vec!["Command task_complete returned: Shutting down: all goals met"]);
}

#[tokio::test]
async fn oversized_output_is_replaced_by_a_failure() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .registry(|r| {
            r.register(Box::new(FnCommand::new("dump", "Prints a lot", |_args, _ctx| async {
                Ok("x".repeat(20_000))
            })));
        })
        .replies(vec![action("dump", json!({}))])
        .build();

    h.agent.step().await.unwrap();

    assert_eq!(h.results(), vec!["Failure: dump returned too much output."]);
}

#[tokio::test]
async fn unparseable_reply_records_unable_to_execute() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        // The second reply answers the repair request.
        .replies(vec![Ok("I think I will look around.".into()), Ok("no idea".into())])
        .build();

    let outcome = h.agent.step().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Continue);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.results(), vec!["Unable to execute command"]);
}

#[tokio::test]
async fn reply_wrapped_in_prose_is_still_understood() {
    let reply = format!(
        "Sure! Here is my answer:\n{}\nLet me know.",
        action("list_files", json!({"directory": ""})).unwrap()
    );
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![Ok(reply)])
        .build();

    h.agent.step().await.unwrap();

    assert_eq!(h.provider.calls(), 1);
    assert!(h.results()[0].starts_with("Command list_files returned: "));
}

#[tokio::test]
async fn malformed_command_is_reported() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![Ok(r#"{"command": "list_files"}"#.into())])
        .build();

    h.agent.step().await.unwrap();

    let results = h.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].starts_with("Could not execute command: "));
}

#[tokio::test]
async fn path_outside_the_workspace_is_refused() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![action("read_file", json!({"filename": "../../etc/passwd"}))])
        .build();

    h.agent.step().await.unwrap();

    let results = h.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].starts_with("Could not execute command: "));
}

#[tokio::test]
async fn model_failure_skips_the_cycle() {
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .replies(vec![Err(ProviderError::Network("connection reset".into()))])
        .build();
    let mut events = h.agent.events().subscribe();

    let outcome = h.agent.step().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped);
    assert!(h.agent.history().is_empty());
    assert_eq!(h.agent.next_action_count(), 1);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event.as_ref(), AgentEvent::ModelCallFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[derive(Default)]
struct Auditor {
    post_command_calls: Mutex<usize>,
}

#[async_trait]
impl Plugin for Auditor {
    fn name(&self) -> &str {
        "auditor"
    }

    fn can_handle_post_planning(&self) -> bool {
        true
    }

    fn post_planning(&self, mut action: Value) -> Value {
        if action["command"]["name"] == "look_around" {
            action["command"] = json!({"name": "list_files", "args": {"directory": ""}});
        }
        action
    }

    fn can_handle_pre_command(&self) -> bool {
        true
    }

    fn pre_command(&self, name: String, mut args: CommandArgs) -> (String, CommandArgs) {
        args.insert("audited".into(), Value::Bool(true));
        (name, args)
    }

    fn can_handle_post_command(&self) -> bool {
        true
    }

    fn post_command(&self, _name: &str, result: String) -> String {
        *self.post_command_calls.lock().unwrap() += 1;
        format!("{result} [audited]")
    }
}

#[tokio::test]
async fn plugins_rewrite_the_action_and_the_result() {
    let auditor = Arc::new(Auditor::default());
    let mut plugins = PluginBus::new();
    plugins.register(auditor.clone());
    let mut h = harness()
        .config(|c| c.interaction.next_action_count = 1)
        .plugins(plugins)
        .replies(vec![action("look_around", json!({}))])
        .build();

    h.agent.step().await.unwrap();

    let result = &h.results()[0];
    assert!(result.starts_with("Command list_files returned: "));
    assert!(result.ends_with(" [audited]"));
    assert_eq!(*auditor.post_command_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn feedback_bypasses_command_hooks() {
    let auditor = Arc::new(Auditor::default());
    let mut plugins = PluginBus::new();
    plugins.register(auditor.clone());
    let mut h = harness()
        .plugins(plugins)
        .replies(vec![action("list_files", json!({"directory": ""}))])
        .inputs(&["try reading notes.txt"])
        .build();

    h.agent.step().await.unwrap();

    assert_eq!(h.results(), vec!["Human feedback: try reading notes.txt"]);
    assert_eq!(*auditor.post_command_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn cycle_logs_are_written_when_enabled() {
    let mut h = harness()
        .config(|c| {
            c.interaction.next_action_count = 1;
            c.logging.log_cycles = true;
        })
        .replies(vec![action("list_files", json!({"directory": ""}))])
        .build();

    h.agent.step().await.unwrap();

    let logs = h.dir.path().join("logs");
    let agent_dir = std::fs::read_dir(&logs).unwrap().next().unwrap().unwrap().path();
    assert!(agent_dir.join("001").join("0_full_message_history.json").exists());
    assert!(agent_dir.join("001").join("1_next_action.json").exists());
}
