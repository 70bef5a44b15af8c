// ABOUTME: Main entry point for the Cloudbox sandbox runtime

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cloudbox::config::{SessionConfig, AGENT_BINARY, DEFAULT_MODEL, WORKSPACE_ROOT};
use cloudbox::session::SandboxSession;

#[derive(Parser, Debug)]
#[command(name = "cloudbox", about = "Ephemeral sandbox runtime for an AI coding agent")]
struct Cli {
    /// Control-plane session this sandbox belongs to
    #[arg(long, env = "CLOUDBOX_SESSION_ID")]
    session_id: String,

    /// Sandbox identifier; generated when absent
    #[arg(long, env = "CLOUDBOX_SANDBOX_ID")]
    sandbox_id: Option<String>,

    #[arg(long, env = "CLOUDBOX_REPO_OWNER")]
    repo_owner: String,

    #[arg(long, env = "CLOUDBOX_REPO_NAME")]
    repo_name: String,

    /// Working branch the agent commits to
    #[arg(long, env = "CLOUDBOX_BRANCH")]
    branch: String,

    /// Branch the working branch is created from
    #[arg(long, env = "CLOUDBOX_BASE_BRANCH", default_value = "main")]
    base_branch: String,

    /// HTTP base of the control plane; the bridge URL is derived from it
    #[arg(long, env = "CLOUDBOX_CONTROL_PLANE_URL")]
    control_plane_url: String,

    #[arg(long, env = "CLOUDBOX_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "CLOUDBOX_GIT_USER_NAME")]
    git_user_name: Option<String>,

    #[arg(long, env = "CLOUDBOX_GIT_USER_EMAIL")]
    git_user_email: Option<String>,

    /// Snapshot the workspace volume was restored from, if any
    #[arg(long, env = "CLOUDBOX_SNAPSHOT_ID")]
    snapshot_id: Option<String>,

    #[arg(long, env = "CLOUDBOX_WORKSPACE_ROOT", default_value = WORKSPACE_ROOT)]
    workspace_root: std::path::PathBuf,

    #[arg(long, env = "CLOUDBOX_AGENT_BINARY", default_value = AGENT_BINARY)]
    agent_binary: std::path::PathBuf,
}

impl Cli {
    fn into_config(self) -> SessionConfig {
        let sandbox_id = self
            .sandbox_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut config = SessionConfig::new(
            self.session_id,
            sandbox_id,
            self.repo_owner,
            self.repo_name,
            self.branch,
            self.base_branch,
            self.control_plane_url,
        );
        config.model = self.model;
        config.git_user_name = self.git_user_name;
        config.git_user_email = self.git_user_email;
        config.snapshot_id = self.snapshot_id;
        config.workspace_root = self.workspace_root;
        config.agent_binary = self.agent_binary;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    // Secrets stay in the environment; they are never part of the CLI surface.
    let shared_secret = std::env::var("SANDBOX_SHARED_SECRET")
        .context("SANDBOX_SHARED_SECRET must be set")?;
    let clone_credential =
        std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN must be set")?;

    let config = cli.into_config();
    info!(
        "Starting sandbox {} for session {}",
        config.sandbox_id, config.session_id
    );

    let mut session = SandboxSession::new(config, shared_secret);

    if let Err(err) = session.initialize(&clone_credential).await {
        error!("Session initialization failed: {err}");
        anyhow::bail!("initialization failed: {err}");
    }

    let outcome = session.run().await;
    let pushed = session.shutdown().await;

    match outcome {
        Ok(()) => {
            info!("Session ended (changes persisted: {pushed})");
            Ok(())
        }
        Err(err) => {
            error!("Session ended with bridge failure: {err}");
            anyhow::bail!("session failed: {err}");
        }
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_env("CLOUDBOX_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
