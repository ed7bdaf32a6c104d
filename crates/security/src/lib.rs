//! Security module for ironloop: the sandboxed workspace.
//!
//! Every file and directory argument a command receives is resolved
//! against a single workspace root. Resolution fails closed: a path that
//! would land outside the root is an error, never a silently clamped path.

pub mod workspace;

pub use workspace::{PATH_LIKE_ARGS, Workspace, WorkspaceError};
