use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::catalog::CatalogError;

const DEFAULT_BRANCH: &str = "master";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Local cache directory the repositories are cloned into.
    pub storage_dir: PathBuf,
    pub repositories: Vec<Repository>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Repository {
    pub address: String,
    pub branch: String,
}

/// Clones or pulls the configured repositories with the local `git` binary.
/// A repository is considered updated when the local and remote commit
/// lists diverge.
#[derive(Debug)]
pub(crate) struct Synchronizer {
    cfg: SyncConfig,
}

impl Synchronizer {
    pub(crate) fn new(cfg: SyncConfig) -> Self {
        Self { cfg }
    }

    /// Synchronizes every repository; returns true when any of them was
    /// updated. Per-repository failures are logged and do not stop the
    /// others.
    pub(crate) async fn synchronize(&self) -> bool {
        let mut updated_any = false;
        for repo in &self.cfg.repositories {
            let branch = if repo.branch.is_empty() {
                DEFAULT_BRANCH
            } else {
                &repo.branch
            };
            let location = self.cfg.storage_dir.join(repository_dir_name(&repo.address));
            match self.sync_repository(&repo.address, branch, &location).await {
                Ok(updated) => {
                    info!(repository = %repo.address, updated, "repository synchronized");
                    updated_any |= updated;
                }
                Err(err) => {
                    warn!(repository = %repo.address, %err, "failed to synchronize repository");
                }
            }
        }
        updated_any
    }

    async fn sync_repository(
        &self,
        address: &str,
        branch: &str,
        location: &Path,
    ) -> Result<bool, CatalogError> {
        if !location.join(".git").exists() {
            info!(repository = %address, branch, location = %location.display(), "start to clone repository");
            if let Some(parent) = location.parent() {
                std::fs::create_dir_all(parent)?;
            }
            git(
                &[
                    "clone",
                    "--branch",
                    branch,
                    address,
                    &location.to_string_lossy(),
                ],
                Path::new("."),
            )
            .await?;
            return Ok(true);
        }

        git(&["fetch", "origin", branch], location).await?;
        let local = list_commits("HEAD", location).await?;
        let remote = list_commits(&format!("origin/{branch}"), location).await?;
        if local == remote {
            return Ok(false);
        }
        info!(repository = %address, branch, "start to pull repository");
        git(&["pull", "origin", branch], location).await?;
        Ok(true)
    }
}

async fn list_commits(rev: &str, dir: &Path) -> Result<usize, CatalogError> {
    let out = git(&["rev-list", "--count", rev], dir).await?;
    out.trim().parse().map_err(|_| CatalogError::Git {
        command: "rev-list".to_string(),
        detail: format!("unexpected output: {out}"),
    })
}

async fn git(args: &[&str], dir: &Path) -> Result<String, CatalogError> {
    let output = Command::new("git").args(args).current_dir(dir).output().await?;
    if !output.status.success() {
        return Err(CatalogError::Git {
            command: args.join(" "),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn repository_dir_name(address: &str) -> String {
    let name: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    name.trim_matches('_').to_string()
}
