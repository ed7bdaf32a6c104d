//! Workspace path resolution: filesystem sandboxing to the workspace root.
//!
//! Paths handed to commands by the model are untrusted. They are joined
//! onto the workspace root, normalized, and (when restriction is on)
//! rejected if the result escapes the root, including through symlinks.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

/// Argument names that carry filesystem paths.
pub const PATH_LIKE_ARGS: [&str; 3] = ["filename", "directory", "clone_path"];

/// Null-byte spellings rejected anywhere in a path.
const NULL_BYTES: [&str; 4] = ["\0", "\\0", "\\x00", "%00"];

/// Error returned when a path cannot be resolved inside the workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("embedded null byte in path '{path}'")]
    NullByte { path: String },

    #[error("Attempted to access absolute path '{path}' in workspace '{root}'")]
    AbsolutePathOutside { path: String, root: String },

    #[error("Attempted to access path '{path}' outside of workspace '{root}'")]
    OutsideWorkspace { path: String, root: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

/// The sandboxed filesystem root all path arguments resolve against.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    restrict_to_root: bool,
}

impl Workspace {
    /// Create a workspace rooted at `root`.
    ///
    /// The root itself is resolved (symlinks followed where it exists) so
    /// later containment checks compare like with like.
    pub fn new(root: impl AsRef<Path>, restrict_to_root: bool) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        reject_null_bytes(root)?;
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| WorkspaceError::ResolveFailed {
                    path: root.display().to_string(),
                    reason: e.to_string(),
                })?
                .join(root)
        };
        Ok(Self {
            root: resolve(&absolute)?,
            restrict_to_root,
        })
    }

    /// Create the root directory on disk if it does not exist yet.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn restrict_to_root(&self) -> bool {
        self.restrict_to_root
    }

    /// Resolve a (usually relative) path inside the workspace.
    pub fn get_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let relative = relative.as_ref();
        reject_null_bytes(relative)?;

        if relative.is_absolute() && self.restrict_to_root && !relative.starts_with(&self.root) {
            // Absolute paths are only honoured when they already sit under the root.
            let normalized = normalize(relative);
            if !normalized.starts_with(&self.root) {
                return Err(WorkspaceError::AbsolutePathOutside {
                    path: relative.display().to_string(),
                    root: self.root.display().to_string(),
                });
            }
        }

        let full = resolve(&self.root.join(relative))?;
        if self.restrict_to_root && !full.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace {
                path: full.display().to_string(),
                root: self.root.display().to_string(),
            });
        }
        Ok(full)
    }

    /// Rewrite the path-like entries of a command's arguments in place.
    ///
    /// A `directory` of `""` or `"/"` means the workspace root itself; in
    /// that case no other argument is touched. Otherwise every string-valued
    /// `filename`, `directory` and `clone_path` is resolved with [`get_path`].
    ///
    /// [`get_path`]: Workspace::get_path
    pub fn resolve_pathlike_args(&self, args: &mut Map<String, Value>) -> Result<(), WorkspaceError> {
        if let Some(Value::String(dir)) = args.get("directory")
            && (dir.is_empty() || dir == "/")
        {
            args.insert(
                "directory".into(),
                Value::String(self.root.display().to_string()),
            );
            return Ok(());
        }

        for key in PATH_LIKE_ARGS {
            if let Some(Value::String(raw)) = args.get(key) {
                let resolved = self.get_path(raw)?;
                debug!(arg = key, path = %resolved.display(), "Resolved path argument");
                args.insert(key.into(), Value::String(resolved.display().to_string()));
            }
        }
        Ok(())
    }
}

fn reject_null_bytes(path: &Path) -> Result<(), WorkspaceError> {
    let text = path.to_string_lossy();
    if NULL_BYTES.iter().any(|nb| text.contains(nb)) {
        return Err(WorkspaceError::NullByte {
            path: text.escape_default().to_string(),
        });
    }
    Ok(())
}

/// Lexically normalize `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve an absolute path: canonicalize the longest existing prefix so
/// symlinks are followed, then append the not-yet-existing remainder.
fn resolve(path: &Path) -> Result<PathBuf, WorkspaceError> {
    let normalized = normalize(path);
    let mut existing = normalized.as_path();
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();

    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| WorkspaceError::ResolveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
