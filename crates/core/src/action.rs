//! The model's proposed next step.
//!
//! The wire format is a JSON object with `thoughts` and `command` keys.
//! Parsing here is lenient about the thoughts (they are only displayed)
//! and strict about the command (it is about to be executed).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Arguments of a command invocation.
pub type CommandArgs = Map<String, Value>;

/// The model's reasoning fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thoughts {
    #[serde(default, deserialize_with = "lenient_text")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reasoning: String,
    /// Models send the plan either as one string or as a list of steps.
    #[serde(default, deserialize_with = "lenient_text")]
    pub plan: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub criticism: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub speak: String,
}

impl Thoughts {
    /// Read the `thoughts` object out of a repaired action, if present.
    pub fn from_action(action: &Value) -> Option<Self> {
        action
            .get("thoughts")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
    }

    /// The material the model is asked to critique during self-feedback.
    pub fn feedback_material(&self) -> String {
        format!("{}{}{}", self.text, self.reasoning, self.plan)
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => format!("- {s}"),
                other => format!("- {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    })
}

/// A command the model asked to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCall {
    pub name: String,
    #[serde(default)]
    pub args: CommandArgs,
}

impl CommandCall {
    pub fn new(name: impl Into<String>, args: CommandArgs) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Extract the command from a repaired action.
    ///
    /// The error is a short explanation meant for the model.
    pub fn from_action(action: &Value) -> Result<Self, String> {
        let Some(object) = action.as_object() else {
            return Err("'response_json' object is not dictionary".into());
        };
        let Some(command) = object.get("command") else {
            return Err("Missing 'command' object in JSON".into());
        };
        let Some(command) = command.as_object() else {
            return Err("'command' object is not a dictionary".into());
        };
        let name = match command.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(_) => return Err("'name' field in 'command' object is not a string".into()),
            None => return Err("Missing 'name' field in 'command' object".into()),
        };
        let args = match command.get("args") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(_) => return Err("'args' field in 'command' object is not a dictionary".into()),
        };
        Ok(Self { name, args })
    }
}
