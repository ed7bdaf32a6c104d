//! Workspace file commands: read, write, append, delete and list.
//!
//! Every path is resolved through the agent's workspace before use, and
//! every mutation is recorded in the operation log so repeated writes and
//! deletes are caught before they touch the disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ironloop_core::action::CommandArgs;
use ironloop_core::command::{Command, CommandContext, CommandParameter};
use ironloop_core::error::CommandError;
use tracing::debug;
use walkdir::WalkDir;

use crate::oplog::{Operation, OperationLog, text_checksum};

fn string_arg<'a>(args: &'a CommandArgs, name: &str) -> Result<&'a str, CommandError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CommandError::InvalidArguments(format!("'{name}' must be a string")))
}

fn resolve(ctx: &CommandContext, raw: &str) -> Result<PathBuf, CommandError> {
    ctx.workspace
        .get_path(raw)
        .map_err(|e| CommandError::PermissionDenied(e.to_string()))
}

fn operation_log(ctx: &CommandContext) -> OperationLog {
    OperationLog::new(ctx.workspace.root().join(&ctx.config.workspace.file_logger_path))
}

fn log_failure(e: crate::oplog::OpLogError) -> CommandError {
    CommandError::ExecutionFailed(e.to_string())
}

fn io_failure(path: &Path, e: std::io::Error) -> CommandError {
    CommandError::ExecutionFailed(format!("{}: {e}", path.display()))
}

/// `read_file`: return a file's contents.
pub struct ReadFileCommand;

#[async_trait]
impl Command for ReadFileCommand {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![CommandParameter::required("filename", "string", "Path of the file to read")]
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let path = resolve(ctx, string_arg(&args, "filename")?)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_failure(&path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// `write_to_file`: replace a file's contents.
pub struct WriteToFileCommand;

#[async_trait]
impl Command for WriteToFileCommand {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Write to file"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![
            CommandParameter::required("filename", "string", "Path of the file to write"),
            CommandParameter::required("text", "string", "The new contents"),
        ]
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let path = resolve(ctx, string_arg(&args, "filename")?)?;
        let text = string_arg(&args, "text")?;
        let key = path.display().to_string();
        let checksum = text_checksum(text);
        let log = operation_log(ctx);

        if log
            .is_duplicate(Operation::Write, &key, Some(&checksum))
            .map_err(log_failure)?
        {
            return Ok("Error: File has already been updated.".into());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_failure(parent, e))?;
        }
        tokio::fs::write(&path, text).await.map_err(|e| io_failure(&path, e))?;
        log.append(Operation::Write, &key, Some(&checksum)).map_err(log_failure)?;

        debug!(path = %key, bytes = text.len(), "Wrote file");
        Ok("File written to successfully.".into())
    }
}

/// `append_to_file`: add text to the end of a file.
pub struct AppendToFileCommand;

#[async_trait]
impl Command for AppendToFileCommand {
    fn name(&self) -> &str {
        "append_to_file"
    }

    fn description(&self) -> &str {
        "Append to file"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![
            CommandParameter::required("filename", "string", "Path of the file to extend"),
            CommandParameter::required("text", "string", "Text to append"),
        ]
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        use tokio::io::AsyncWriteExt;

        let path = resolve(ctx, string_arg(&args, "filename")?)?;
        let text = string_arg(&args, "text")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_failure(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_failure(&path, e))?;
        file.write_all(text.as_bytes()).await.map_err(|e| io_failure(&path, e))?;
        file.flush().await.map_err(|e| io_failure(&path, e))?;

        // The logged checksum covers the whole file after the append.
        let contents = tokio::fs::read(&path).await.map_err(|e| io_failure(&path, e))?;
        let checksum = text_checksum(&String::from_utf8_lossy(&contents));
        operation_log(ctx)
            .append(Operation::Append, &path.display().to_string(), Some(&checksum))
            .map_err(log_failure)?;

        Ok("Text appended successfully.".into())
    }
}

/// `delete_file`: remove a file.
pub struct DeleteFileCommand;

#[async_trait]
impl Command for DeleteFileCommand {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete file"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![CommandParameter::required("filename", "string", "Path of the file to delete")]
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let path = resolve(ctx, string_arg(&args, "filename")?)?;
        let key = path.display().to_string();
        let log = operation_log(ctx);

        if log.is_duplicate(Operation::Delete, &key, None).map_err(log_failure)? {
            return Ok("Error: File has already been deleted.".into());
        }

        tokio::fs::remove_file(&path).await.map_err(|e| io_failure(&path, e))?;
        log.append(Operation::Delete, &key, None).map_err(log_failure)?;
        Ok("File deleted successfully.".into())
    }
}

/// `list_files`: every file under a directory, recursively.
///
/// Paths are relative to the workspace root. Hidden files and the
/// operation log itself are skipped.
pub struct ListFilesCommand;

#[async_trait]
impl Command for ListFilesCommand {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List Files in Directory"
    }

    fn signature(&self) -> Vec<CommandParameter> {
        vec![CommandParameter::required("directory", "string", "Directory to list")]
    }

    async fn execute(&self, args: CommandArgs, ctx: &CommandContext) -> Result<String, CommandError> {
        let directory = resolve(ctx, string_arg(&args, "directory")?)?;
        let root = ctx.workspace.root().to_path_buf();
        let log_path = operation_log(ctx).path().to_path_buf();

        let files = tokio::task::spawn_blocking(move || list_relative(&directory, &root, &log_path))
            .await
            .map_err(|e| CommandError::ExecutionFailed(e.to_string()))??;

        serde_json::to_string(&files).map_err(|e| CommandError::ExecutionFailed(e.to_string()))
    }
}

fn list_relative(directory: &Path, root: &Path, skip: &Path) -> Result<Vec<String>, CommandError> {
    if !directory.is_dir() {
        return Err(CommandError::ExecutionFailed(format!(
            "{}: not a directory",
            directory.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(directory).sort_by_file_name().into_iter().filter_entry(|e| {
        e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
    });
    for entry in walker {
        let entry = entry.map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
        if !entry.file_type().is_file() || entry.path() == skip {
            continue;
        }
        let shown = entry.path().strip_prefix(root).unwrap_or(entry.path());
        files.push(shown.display().to_string());
    }
    Ok(files)
}
