//! Git subprocess primitives used to mirror the registry index and check
//! out git dependencies.

use crate::source::SourceError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Clone `remote` into `cwd/name`.
pub async fn clone(remote: &str, name: &str, cwd: &Path) -> Result<(), SourceError> {
    run(cwd, &["clone", "--quiet", remote, name]).await.map(drop)
}

/// Fast-forward a clone to the latest remote state.
pub async fn pull(dir: &Path) -> Result<(), SourceError> {
    run(dir, &["pull", "--quiet", "--ff-only"]).await.map(drop)
}

/// Fetch remote branches and tags without touching the working tree.
pub async fn fetch(dir: &Path) -> Result<(), SourceError> {
    run(dir, &["fetch", "--quiet", "--tags", "origin"]).await.map(drop)
}

/// Check out `target` (a commit, `tags/<tag>`, or `origin/<branch>`).
pub async fn checkout(dir: &Path, target: &str) -> Result<(), SourceError> {
    run(dir, &["checkout", "--quiet", "--detach", target])
        .await
        .map(drop)
}

/// The commit currently checked out.
pub async fn head_revision(dir: &Path) -> Result<String, SourceError> {
    run(dir, &["rev-parse", "HEAD"])
        .await
        .map(|out| out.trim().to_string())
}

async fn run(dir: &Path, args: &[&str]) -> Result<String, SourceError> {
    debug!(dir = %dir.display(), "git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(SourceError::Git {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
