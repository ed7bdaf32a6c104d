//! Console: the human-facing side of the loop.
//!
//! The loop never prints. Thoughts, proposed actions and results go
//! through a [`Console`], and so does reading the human's answer at the
//! authorization gate.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[async_trait]
pub trait Console: Send + Sync {
    /// Show a titled block of text.
    fn say(&self, title: &str, content: &str);

    /// Show a warning.
    fn warn(&self, text: &str);

    /// Prompt with `label` and read one line. `None` at end of input.
    async fn read_line(&self, label: &str) -> Option<String>;
}

/// Terminal console over stdin/stdout.
pub struct StdinConsole {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinConsole {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdinConsole {
    fn say(&self, title: &str, content: &str) {
        if title.is_empty() {
            println!("{content}");
        } else {
            println!("{title} {content}");
        }
    }

    fn warn(&self, text: &str) {
        eprintln!("WARNING: {text}");
    }

    async fn read_line(&self, label: &str) -> Option<String> {
        print!("{label}");
        let _ = std::io::stdout().flush();
        self.lines.lock().await.next_line().await.ok().flatten()
    }
}

/// A console that answers from a script and records what it was shown.
#[derive(Default)]
pub struct ScriptedConsole {
    inputs: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<(String, String)>>,
    warnings: Mutex<Vec<String>>,
    prompts: Mutex<usize>,
}

impl ScriptedConsole {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: Mutex::new(inputs.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// How many times input was asked for.
    pub fn prompts(&self) -> usize {
        *self.prompts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every `(title, content)` pair shown so far.
    pub fn transcript(&self) -> Vec<(String, String)> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether any shown block starts with `title`.
    pub fn saw(&self, title: &str) -> bool {
        self.transcript().iter().any(|(t, _)| t.starts_with(title))
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    fn say(&self, title: &str, content: &str) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), content.to_string()));
    }

    fn warn(&self, text: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    async fn read_line(&self, _label: &str) -> Option<String> {
        *self.prompts.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}
