// ABOUTME: Sandbox session orchestration - prepare the workspace, serve prompts over the bridge,
// persist the working tree before exit

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::{BridgeError, ControlPlaneBridge};
use crate::config::SessionConfig;
use crate::events::EventEmitter;
use crate::git::{GitError, GitWorkspace};
use crate::runner::{AgentRunner, StopHandle};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// One ephemeral sandbox session. Owns the workspace, the runner, and the
/// emitter; the workspace directory is exclusive to this session for its
/// lifetime.
pub struct SandboxSession {
    config: SessionConfig,
    emitter: Arc<EventEmitter>,
    workspace: GitWorkspace,
    runner: AgentRunner,
    secret: String,
}

impl SandboxSession {
    pub fn new(config: SessionConfig, shared_secret: impl Into<String>) -> Self {
        let secret = shared_secret.into();
        let emitter = Arc::new(EventEmitter::new(
            config.session_id.clone(),
            config.control_plane_url.clone(),
            secret.clone(),
        ));
        let workspace = GitWorkspace::new(&config, emitter.clone());
        let runner = AgentRunner::new(
            config.workspace_path(),
            config.agent_binary.clone(),
            config.model.clone(),
            emitter.clone(),
        );
        Self {
            config,
            emitter,
            workspace,
            runner,
            secret,
        }
    }

    pub fn emitter(&self) -> Arc<EventEmitter> {
        self.emitter.clone()
    }

    /// Handle for cancelling an in-flight prompt from outside the bridge
    /// loop (an HTTP stop endpoint, a shutdown hook).
    pub fn stop_handle(&self) -> StopHandle {
        self.runner.stop_handle()
    }

    /// Prepare the working tree: clone, check out the working branch,
    /// configure the commit identity, and report readiness.
    pub async fn initialize(&mut self, clone_credential: &str) -> Result<(), SessionError> {
        self.workspace.clone_repo(clone_credential).await?;
        self.workspace.checkout_or_create_branch().await?;
        self.workspace
            .configure_identity(
                self.config.git_user_name.as_deref(),
                self.config.git_user_email.as_deref(),
            )
            .await;
        self.emitter.git_sync("ready", None).await;
        info!("Session {} initialized", self.config.session_id);
        Ok(())
    }

    /// Connect the bridge and serve commands until the control plane stops
    /// the session or disconnects. A peer disconnect ends the session
    /// normally; only transport faults surface as errors.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let mut bridge =
            ControlPlaneBridge::new(&self.config, self.secret.clone(), self.emitter.clone());
        bridge.connect().await?;
        let result = bridge.run(&mut self.runner).await;
        bridge.close().await;

        match result {
            Ok(()) => Ok(()),
            Err(BridgeError::ConnectionClosed) => {
                info!("Control plane disconnected, ending session");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Commit-before-exit: persist whatever the agent changed. Returns
    /// whether the push succeeded; a failure is logged, never raised.
    pub async fn shutdown(&mut self) -> bool {
        let pushed = self.workspace.push().await;
        if !pushed {
            warn!("Workspace changes were not persisted");
        }
        pushed
    }
}
