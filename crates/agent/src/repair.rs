//! Response repair: turning whatever the model sent into an action object.
//!
//! Strategies are tried in order, cheapest first:
//!
//! 1. Parse the reply as-is
//! 2. Strip a Markdown code fence and parse what is inside
//! 3. Scan for the first balanced `{ ... }` and parse that
//! 4. Ask a model to rewrite the text as valid JSON, then retry 1–3 on its answer
//!
//! If nothing yields a JSON object the result is `{}`, which the loop
//! treats as "no command this cycle". Schema violations are logged only.

use std::sync::LazyLock;

use async_trait::async_trait;
use ironloop_providers::ModelGateway;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

/// The JSON shape the model is asked to reply with.
pub static RESPONSE_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "thoughts": {
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "reasoning": {"type": "string"},
                    "plan": {"type": ["string", "array"]},
                    "criticism": {"type": "string"},
                    "speak": {"type": "string"}
                },
                "required": ["reasoning", "plan", "criticism"]
            },
            "command": {
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "args": {"type": "object"}
                },
                "required": ["name", "args"]
            }
        },
        "required": ["thoughts", "command"]
    })
});

static VALIDATOR: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    jsonschema::validator_for(&RESPONSE_SCHEMA)
        .map_err(|e| error!(error = %e, "Response schema failed to compile"))
        .ok()
});

/// Something that can ask a model to fix broken JSON.
#[async_trait]
pub trait JsonFixer: Send + Sync {
    /// Return the model's attempt at a corrected document, or `None` if the call failed.
    async fn fix_json(&self, broken: &str, schema: &str) -> Option<String>;
}

#[async_trait]
impl JsonFixer for ModelGateway {
    async fn fix_json(&self, broken: &str, schema: &str) -> Option<String> {
        let function = "def fix_json(json_string: str, schema:str=None) -> str:";
        let args = [format!("'''{broken}'''"), format!("'''{schema}'''")];
        let description = "This function takes a JSON string and ensures that it is parseable and fully compliant \
            with the provided schema. If an object or field specified in the schema isn't contained within the \
            correct JSON, it is omitted. The function also escapes any double quotes within JSON string values \
            to ensure that they are valid. If the JSON string contains any None or NaN values, they are replaced \
            with null before being parsed.";

        match self.call_ai_function(function, &args, description, None).await {
            Ok(fixed) => Some(fixed),
            Err(e) => {
                warn!(error = %e, "AI-assisted JSON fix failed");
                None
            }
        }
    }
}

/// A fixer that never helps. For callers without a model at hand.
pub struct NoFixer;

#[async_trait]
impl JsonFixer for NoFixer {
    async fn fix_json(&self, _broken: &str, _schema: &str) -> Option<String> {
        None
    }
}

/// Recover an action object from a raw model reply.
///
/// Never fails: unrecoverable input becomes an empty object.
pub async fn repair_response(raw: &str, fixer: &dyn JsonFixer) -> Value {
    if let Some(action) = parse_locally(raw) {
        log_schema_violations(&action);
        return action;
    }

    debug!(reply = %raw, "Reply is not valid JSON, asking the model to fix it");
    let schema = RESPONSE_SCHEMA.to_string();
    if let Some(fixed) = fixer.fix_json(raw, &schema).await {
        if let Some(action) = parse_locally(&fixed) {
            log_schema_violations(&action);
            return action;
        }
        warn!(fixed = %fixed, "AI-fixed JSON still does not parse");
    }

    error!(reply = %raw, "Could not recover an action from the model reply");
    Value::Object(Map::new())
}

/// Strategies 1–3: everything that does not need a model.
pub fn parse_locally(raw: &str) -> Option<Value> {
    let text = raw.trim();
    parse_object(text)
        .or_else(|| strip_code_fence(text).and_then(parse_object))
        .or_else(|| extract_json_object(text).and_then(parse_object))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// The body of the first ```` ``` ```` fence, with an optional language tag dropped.
pub fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let rest = match rest.find('\n') {
        Some(nl) if !rest[..nl].trim_start().starts_with('{') => &rest[nl + 1..],
        _ => rest,
    };
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// The first balanced `{ ... }` substring, honoring string literals and escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Schema violations as `path: message` strings. Empty when the action conforms.
pub fn schema_violations(action: &Value) -> Vec<String> {
    let Some(validator) = VALIDATOR.as_ref() else {
        return Vec::new();
    };
    validator
        .iter_errors(action)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect()
}

fn log_schema_violations(action: &Value) {
    for violation in schema_violations(action) {
        warn!(violation = %violation, "Action does not match the response schema");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedFixer {
        reply: Option<String>,
        calls: Mutex<usize>,
    }

    impl ScriptedFixer {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl JsonFixer for ScriptedFixer {
        async fn fix_json(&self, _broken: &str, _schema: &str) -> Option<String> {
            *self.calls.lock().unwrap() += 1;
            self.reply.clone()
        }
    }

    fn valid_action() -> Value {
        json!({
            "thoughts": {
                "text": "t", "reasoning": "r", "plan": "- p", "criticism": "c", "speak": "s"
            },
            "command": {"name": "list_files", "args": {"directory": "."}}
        })
    }

    #[tokio::test]
    async fn valid_json_is_returned_unchanged() {
        let fixer = ScriptedFixer::new(None);
        let action = repair_response(&valid_action().to_string(), &fixer).await;
        assert_eq!(action, valid_action());
        assert_eq!(fixer.calls(), 0);
    }

    #[tokio::test]
    async fn json_embedded_in_prose_is_extracted() {
        let fixer = ScriptedFixer::new(None);
        let raw = format!("Sure! Here is my next step: {} Let me know.", valid_action());
        let action = repair_response(&raw, &fixer).await;
        assert_eq!(action, valid_action());
        assert_eq!(fixer.calls(), 0);
    }

    #[tokio::test]
    async fn fenced_json_is_unwrapped() {
        let raw = format!("```json\n{}\n```", valid_action());
        let action = repair_response(&raw, &NoFixer).await;
        assert_eq!(action, valid_action());
    }

    #[tokio::test]
    async fn garbage_becomes_empty_object() {
        let fixer = ScriptedFixer::new(Some("still not json"));
        let action = repair_response("I don't know what to do", &fixer).await;
        assert_eq!(action, json!({}));
        assert_eq!(fixer.calls(), 1);
    }

    #[tokio::test]
    async fn model_fix_is_used_when_local_repair_fails() {
        let fixer = ScriptedFixer::new(Some(r#"{"command": {"name": "task_complete", "args": {}}}"#));
        let action = repair_response(r#"{"command": {"name": "task_complete", "args": {}"#, &fixer).await;
        assert_eq!(action["command"]["name"], "task_complete");
        assert_eq!(fixer.calls(), 1);
    }

    #[tokio::test]
    async fn bare_json_scalars_are_not_actions() {
        let action = repair_response("\"just a string\"", &NoFixer).await;
        assert_eq!(action, json!({}));
    }

    #[test]
    fn scanner_ignores_braces_inside_strings() {
        let text = r#"noise {"a": "}{", "b": {"c": "\"}"}} trailing }"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": "}{", "b": {"c": "\"}"}}"#));
    }

    #[test]
    fn scanner_gives_up_on_unbalanced_input() {
        assert_eq!(extract_json_object("{\"a\": {\"b\": 1}"), None);
        assert_eq!(extract_json_object("no braces"), None);
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(strip_code_fence("```{\"a\":1}```"), Some("{\"a\":1}"));
    }

    #[test]
    fn conforming_action_has_no_violations() {
        assert!(schema_violations(&valid_action()).is_empty());
    }

    #[test]
    fn missing_command_fields_are_violations() {
        let action = json!({
            "thoughts": {"reasoning": "r", "plan": "p", "criticism": "c"},
            "command": {"name": "x"}
        });
        let violations = schema_violations(&action);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("args"));
    }
}
