// ABOUTME: Tests for the git workspace lifecycle against local bare repositories
// Exercises clone, branch checkout, status, push, and the state machine guards

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use cloudbox::bridge::OutboundMessage;
use cloudbox::config::SessionConfig;
use cloudbox::events::{EventEmitter, EventKind};
use cloudbox::git::{GitError, GitWorkspace, WorkspaceState};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("git is available");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn commit_args<'a>(rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "-c",
        "user.name=Seed",
        "-c",
        "user.email=seed@example.com",
    ];
    args.extend_from_slice(rest);
    args
}

/// Bare origin seeded with one commit on `main`, plus the seeding clone for
/// pushing extra fixtures.
fn seeded_origin(root: &Path) -> (PathBuf, PathBuf) {
    git(root, &["init", "--bare", "--initial-branch=main", "origin.git"]);
    git(root, &["clone", "origin.git", "seed"]);
    let seed = root.join("seed");
    git(&seed, &["checkout", "-B", "main"]);
    std::fs::write(seed.join("README.md"), "seed\n").unwrap();
    git(&seed, &["add", "."]);
    git(&seed, &commit_args(&["commit", "-m", "seed commit"]));
    git(&seed, &["push", "origin", "main"]);
    (root.join("origin.git"), seed)
}

fn capture_emitter() -> (Arc<EventEmitter>, mpsc::UnboundedReceiver<OutboundMessage>) {
    let emitter = Arc::new(EventEmitter::new("session-test", "http://127.0.0.1:9", "secret"));
    let (tx, rx) = mpsc::unbounded_channel();
    emitter.set_bridge(tx);
    (emitter, rx)
}

fn workspace_for(
    root: &Path,
    origin: &Path,
    branch: &str,
) -> (GitWorkspace, mpsc::UnboundedReceiver<OutboundMessage>) {
    let mut config = SessionConfig::new(
        "s-1",
        "sb-1",
        "acme",
        "project",
        branch,
        "main",
        "http://127.0.0.1:9",
    );
    config.workspace_root = root.join("workspace");
    let (emitter, rx) = capture_emitter();
    let workspace =
        GitWorkspace::new(&config, emitter).with_remote_url(origin.display().to_string());
    (workspace, rx)
}

fn git_sync_statuses(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<String> {
    let mut statuses = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let OutboundMessage::Event { event } = message {
            if event.kind == EventKind::GitSync {
                statuses.push(event.data["status"].as_str().unwrap().to_string());
            }
        }
    }
    statuses
}

#[tokio::test]
async fn clone_and_checkout_create_branch_from_base() {
    let tmp = TempDir::new().unwrap();
    let (origin, _seed) = seeded_origin(tmp.path());
    let (mut workspace, mut rx) = workspace_for(tmp.path(), &origin, "feature/x");

    workspace.clone_repo("unused").await.unwrap();
    assert_eq!(workspace.state(), WorkspaceState::Cloned);

    workspace.checkout_or_create_branch().await.unwrap();
    assert_eq!(workspace.state(), WorkspaceState::CheckedOut);

    let status = workspace.status().await.unwrap();
    assert_eq!(status.branch.as_deref(), Some("feature/x"));
    assert!(!status.dirty);
    assert!(status.head_sha.is_some());

    assert_eq!(
        git_sync_statuses(&mut rx),
        vec!["cloning", "cloned", "checking_out", "checked_out"]
    );
}

#[tokio::test]
async fn checkout_reuses_existing_remote_branch() {
    let tmp = TempDir::new().unwrap();
    let (origin, seed) = seeded_origin(tmp.path());

    // Put feature/y on the origin ahead of the session.
    git(&seed, &["checkout", "-b", "feature/y"]);
    std::fs::write(seed.join("notes.txt"), "remote work\n").unwrap();
    git(&seed, &["add", "."]);
    git(&seed, &commit_args(&["commit", "-m", "remote work"]));
    git(&seed, &["push", "origin", "feature/y"]);
    let remote_sha = git(&seed, &["rev-parse", "HEAD"]).trim().to_string();

    let (mut workspace, _rx) = workspace_for(tmp.path(), &origin, "feature/y");
    workspace.clone_repo("unused").await.unwrap();
    workspace.checkout_or_create_branch().await.unwrap();

    let status = workspace.status().await.unwrap();
    assert_eq!(status.branch.as_deref(), Some("feature/y"));
    assert_eq!(status.head_sha.as_deref(), Some(remote_sha.as_str()));
    assert!(workspace.path().join("notes.txt").exists());
}

#[tokio::test]
async fn push_on_clean_tree_is_a_noop_success() {
    let tmp = TempDir::new().unwrap();
    let (origin, _seed) = seeded_origin(tmp.path());
    let (mut workspace, _rx) = workspace_for(tmp.path(), &origin, "feature/x");

    workspace.clone_repo("unused").await.unwrap();
    workspace.checkout_or_create_branch().await.unwrap();

    assert!(workspace.push().await);

    // Nothing was committed, so the branch never reached the origin.
    let heads = git(tmp.path(), &["ls-remote", "--heads", "origin.git", "feature/x"]);
    assert!(heads.trim().is_empty());
}

#[tokio::test]
async fn push_commits_and_publishes_changes() {
    let tmp = TempDir::new().unwrap();
    let (origin, _seed) = seeded_origin(tmp.path());
    let (mut workspace, mut rx) = workspace_for(tmp.path(), &origin, "feature/x");

    workspace.clone_repo("unused").await.unwrap();
    workspace.checkout_or_create_branch().await.unwrap();
    workspace.configure_identity(None, None).await;

    std::fs::write(workspace.path().join("agent_output.txt"), "changed\n").unwrap();
    let status = workspace.status().await.unwrap();
    assert!(status.dirty);
    assert_eq!(status.changed_paths, vec!["agent_output.txt"]);

    assert!(workspace.push().await);

    let heads = git(tmp.path(), &["ls-remote", "--heads", "origin.git", "feature/x"]);
    assert!(heads.contains("refs/heads/feature/x"));

    let statuses = git_sync_statuses(&mut rx);
    assert!(statuses.contains(&"pushing".to_string()));
    assert!(statuses.contains(&"pushed".to_string()));
}

#[tokio::test]
async fn operations_out_of_order_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let (origin, _seed) = seeded_origin(tmp.path());
    let (mut workspace, _rx) = workspace_for(tmp.path(), &origin, "feature/x");

    assert!(matches!(
        workspace.checkout_or_create_branch().await,
        Err(GitError::InvalidState(WorkspaceState::Uninitialized))
    ));
    assert!(matches!(
        workspace.status().await,
        Err(GitError::InvalidState(WorkspaceState::Uninitialized))
    ));

    workspace.clone_repo("unused").await.unwrap();
    assert!(matches!(
        workspace.clone_repo("unused").await,
        Err(GitError::InvalidState(WorkspaceState::Cloned))
    ));
}

#[tokio::test]
async fn clone_failure_resets_state_and_reports() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("does-not-exist.git");
    let (mut workspace, mut rx) = workspace_for(tmp.path(), &missing, "feature/x");

    let result = workspace.clone_repo("unused").await;
    assert!(matches!(result, Err(GitError::CloneFailed(_))));
    assert_eq!(workspace.state(), WorkspaceState::Uninitialized);

    // An error event follows the cloning announcement.
    let mut saw_error = false;
    while let Ok(message) = rx.try_recv() {
        if let OutboundMessage::Event { event } = message {
            if event.kind == EventKind::Error {
                saw_error = true;
            }
        }
    }
    assert!(saw_error);
}
