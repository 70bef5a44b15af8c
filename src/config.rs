// ABOUTME: Immutable session configuration and the timeout/path constants shared across subsystems

use std::path::PathBuf;
use std::time::Duration;

/// Root directory under which repositories are cloned.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Default location of the agent CLI inside the sandbox image.
pub const AGENT_BINARY: &str = "/usr/local/bin/claude";

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

/// Time budget for the initial shallow clone.
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Time budget for every other git subprocess.
pub const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard deadline for a single prompt execution.
pub const AGENT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Bound on the bridge connect + handshake exchange.
pub const BRIDGE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-iteration receive wait in the bridge loop; a tick lets the loop
/// observe a requested shutdown between messages.
pub const BRIDGE_RECEIVE_TICK: Duration = Duration::from_secs(5);

/// Commit identity used when the session does not carry one.
pub const GIT_BOT_NAME: &str = "Cloudbox Bot";
pub const GIT_BOT_EMAIL: &str = "bot@cloudbox.dev";

/// Fixed message for the teardown commit that persists agent changes.
pub const WORKSPACE_COMMIT_MESSAGE: &str = "Changes from cloud workspace session";

/// Immutable configuration for one sandbox session. Built once at startup
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub sandbox_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    /// Branch the agent works on.
    pub branch: String,
    /// Branch the working branch is created from when it does not exist yet.
    pub base_branch: String,
    pub control_plane_url: String,
    pub provider: String,
    pub model: String,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub snapshot_id: Option<String>,
    pub workspace_root: PathBuf,
    pub agent_binary: PathBuf,
}

impl SessionConfig {
    pub fn new(
        session_id: impl Into<String>,
        sandbox_id: impl Into<String>,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        branch: impl Into<String>,
        base_branch: impl Into<String>,
        control_plane_url: impl Into<String>,
    ) -> Self {
        let control_plane_url = control_plane_url.into();
        Self {
            session_id: session_id.into(),
            sandbox_id: sandbox_id.into(),
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            branch: branch.into(),
            base_branch: base_branch.into(),
            control_plane_url: control_plane_url.trim_end_matches('/').to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            git_user_name: None,
            git_user_email: None,
            snapshot_id: None,
            workspace_root: PathBuf::from(WORKSPACE_ROOT),
            agent_binary: PathBuf::from(AGENT_BINARY),
        }
    }

    /// Path of the cloned working tree for this session.
    pub fn workspace_path(&self) -> PathBuf {
        self.workspace_root.join(&self.repo_name)
    }
}
