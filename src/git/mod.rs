// ABOUTME: Git integration module - clones, branches, inspects, and persists the session working tree

pub mod workspace;

pub use workspace::{GitError, GitStatus, GitWorkspace, WorkspaceState};
