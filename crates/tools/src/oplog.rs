//! File operation log: an append-only audit trail of workspace mutations.
//!
//! One record per line, `<op>: <path>[ #<checksum>]`, under a
//! `File Operation Logger` header. Replaying the log gives the last known
//! checksum of every live path, which is how repeated writes and deletes
//! are detected.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

const HEADER: &str = "File Operation Logger";

/// A mutating file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Write,
    Append,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Append => "append",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Operation::Write),
            "append" => Ok(Operation::Append),
            "delete" => Ok(Operation::Delete),
            _ => Err(()),
        }
    }
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub operation: Operation,
    pub path: String,
    pub checksum: Option<String>,
}

#[derive(Debug, Error)]
pub enum OpLogError {
    #[error("line {line}: unknown operation '{operation}'")]
    UnknownOperation { line: usize, operation: String },

    #[error("line {line}: {operation} of '{path}' has no checksum")]
    MissingChecksum {
        line: usize,
        operation: Operation,
        path: String,
    },

    #[error("line {line}: malformed record '{text}'")]
    Malformed { line: usize, text: String },

    #[error("operation log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 hex digest of `text`.
pub fn text_checksum(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Parse the full contents of a log.
pub fn parse_log(contents: &str) -> Result<Vec<OperationRecord>, OpLogError> {
    let mut records = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let text = raw.replace(HEADER, "");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let Some((operation, tail)) = text.split_once(": ") else {
            return Err(OpLogError::Malformed {
                line,
                text: text.to_string(),
            });
        };
        let operation: Operation = operation.trim().parse().map_err(|_| OpLogError::UnknownOperation {
            line,
            operation: operation.trim().to_string(),
        })?;

        let record = match operation {
            Operation::Delete => OperationRecord {
                operation,
                path: tail.trim().to_string(),
                checksum: None,
            },
            Operation::Write | Operation::Append => {
                let Some((path, checksum)) = tail.rsplit_once(" #") else {
                    return Err(OpLogError::MissingChecksum {
                        line,
                        operation,
                        path: tail.trim().to_string(),
                    });
                };
                OperationRecord {
                    operation,
                    path: path.trim().to_string(),
                    checksum: Some(checksum.trim().to_string()),
                }
            }
        };
        records.push(record);
    }
    Ok(records)
}

/// Replay records in order into `path → last checksum`, dropping deleted paths.
pub fn replay(records: &[OperationRecord]) -> HashMap<String, String> {
    let mut state = HashMap::new();
    for record in records {
        match (record.operation, &record.checksum) {
            (Operation::Delete, _) => {
                state.remove(&record.path);
            }
            (_, Some(checksum)) => {
                state.insert(record.path.clone(), checksum.clone());
            }
            (_, None) => {}
        }
    }
    state
}

/// The operation log file of one workspace.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every record. A missing log has no records.
    pub fn records(&self) -> Result<Vec<OperationRecord>, OpLogError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse_log(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current `path → checksum` state.
    pub fn state(&self) -> Result<HashMap<String, String>, OpLogError> {
        Ok(replay(&self.records()?))
    }

    /// Whether performing `operation` on `path` would repeat what the log already shows.
    ///
    /// For writes and appends: the recorded checksum equals `checksum`.
    /// For deletes: the path is absent from the state.
    pub fn is_duplicate(&self, operation: Operation, path: &str, checksum: Option<&str>) -> Result<bool, OpLogError> {
        let state = self.state()?;
        Ok(match operation {
            Operation::Delete => !state.contains_key(path),
            Operation::Write | Operation::Append => {
                checksum.is_some_and(|c| state.get(path).map(String::as_str) == Some(c))
            }
        })
    }

    /// Append one record, creating the log (with its header) if needed.
    pub fn append(&self, operation: Operation, path: &str, checksum: Option<&str>) -> Result<(), OpLogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let fresh = !self.path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if fresh {
            writeln!(file, "{HEADER}")?;
        }
        match checksum {
            Some(checksum) => writeln!(file, "{operation}: {path} #{checksum}")?,
            None => {
                if operation != Operation::Delete {
                    warn!(%operation, path = %path, "Logging operation without checksum");
                }
                writeln!(file, "{operation}: {path}")?
            }
        }
        debug!(%operation, path = %path, "Logged file operation");
        Ok(())
    }
}
