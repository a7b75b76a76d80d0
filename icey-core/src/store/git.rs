use super::{LockEntry, LockStatus, UnlockStatus, VersionedStore};
use crate::error::{IceyError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;

pub const DEFAULT_AUTHOR_NAME: &str = "meea-icey";
pub const DEFAULT_AUTHOR_EMAIL: &str = "meea-icey@example.com";

/// Synthetic identity every changeset is committed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: DEFAULT_AUTHOR_NAME.to_string(),
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct GitOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl From<std::process::Output> for GitOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LfsLock {
    path: String,
    #[serde(default)]
    owner: Option<LfsLockOwner>,
}

#[derive(Debug, Deserialize)]
struct LfsLockOwner {
    name: String,
}

/// Versioned store backed by a git checkout, with locks from git LFS.
pub struct GitStore {
    root: PathBuf,
    url: Option<String>,
    ssh_key: Option<PathBuf>,
    lock_owner: Option<String>,
    author: CommitAuthor,
    // Serializes commands that touch the index or working tree.
    worktree: Mutex<()>,
}

impl GitStore {
    pub fn new(root: impl Into<PathBuf>, url: Option<String>) -> Self {
        Self {
            root: root.into(),
            url,
            ssh_key: None,
            lock_owner: None,
            author: CommitAuthor::default(),
            worktree: Mutex::new(()),
        }
    }

    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = Some(owner.into());
        self
    }

    pub fn with_author(mut self, author: CommitAuthor) -> Self {
        self.author = author;
        self
    }

    async fn run(&self, dir: &Path, args: &[&str], envs: &[(&str, &str)]) -> Result<GitOutput> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(envs.iter().copied());

        if let Some(key) = &self.ssh_key {
            command.env("GIT_SSH_COMMAND", ssh_command(key));
        }

        let output = command.output().await.map_err(|error| {
            IceyError::Store(format!("failed to run git {}: {}", args.join(" "), error))
        })?;

        Ok(output.into())
    }

    /// Run in the checkout and fail on a non-zero exit.
    async fn git(&self, args: &[&str]) -> Result<GitOutput> {
        let output = self.run(&self.root, args, &[]).await?;
        if !output.success {
            return Err(IceyError::Store(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn clone_repository(&self) -> Result<()> {
        let url = self.url.as_deref().ok_or_else(|| {
            IceyError::Config(format!(
                "repository url is required to clone into {}",
                self.root.display()
            ))
        })?;
        let parent = self.root.parent().unwrap_or(Path::new("."));
        let target = self.root.to_str().ok_or_else(|| {
            IceyError::Config(format!("non-utf8 clone path {}", self.root.display()))
        })?;

        tokio::fs::create_dir_all(parent).await?;
        tracing::info!("Cloning {} into {}", url, self.root.display());

        let output = self.run(parent, &["clone", url, target], &[]).await?;
        if !output.success {
            return Err(IceyError::Store(format!(
                "git clone {} failed: {}",
                url,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn has_local_changes(&self, path: &str) -> Result<bool> {
        let output = self.git(&["status", "--porcelain", "--", path]).await?;
        Ok(!output.stdout.trim().is_empty())
    }
}

#[async_trait]
impl VersionedStore for GitStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn identity(&self) -> Result<String> {
        if let Some(owner) = &self.lock_owner {
            return Ok(owner.clone());
        }

        let output = self.git(&["config", "user.name"]).await?;
        let name = output.stdout.trim();
        if name.is_empty() {
            return Err(IceyError::Config(
                "git user.name is not set and no lock owner is configured".to_string(),
            ));
        }
        Ok(name.to_string())
    }

    async fn pull(&self) -> Result<()> {
        let _worktree = self.worktree.lock().await;

        if !tokio::fs::try_exists(&self.root).await? {
            return self.clone_repository().await;
        }

        if !tokio::fs::try_exists(self.root.join(".git")).await? {
            return Err(IceyError::Store(format!(
                "{} exists but is not a git checkout",
                self.root.display()
            )));
        }

        let output = self.git(&["pull", "--ff-only"]).await?;
        tracing::debug!("Pulled {}: {}", self.root.display(), output.stdout.trim());
        Ok(())
    }

    async fn commit_and_push(&self, files: &[String], message: &str) -> Result<()> {
        let _worktree = self.worktree.lock().await;

        for file in files {
            if tokio::fs::try_exists(self.root.join(file)).await? {
                self.git(&["add", "--", file]).await?;
            } else {
                self.git(&["rm", "--cached", "--ignore-unmatch", "--quiet", "--", file])
                    .await?;
            }
        }

        let staged = self.run(&self.root, &["diff", "--cached", "--quiet"], &[]).await?;
        match staged.code {
            Some(0) => {
                tracing::debug!("Nothing staged for '{}', skipping commit", message);
            }
            Some(1) => {
                let envs = [
                    ("GIT_AUTHOR_NAME", self.author.name.as_str()),
                    ("GIT_AUTHOR_EMAIL", self.author.email.as_str()),
                    ("GIT_COMMITTER_NAME", self.author.name.as_str()),
                    ("GIT_COMMITTER_EMAIL", self.author.email.as_str()),
                ];
                let output = self.run(&self.root, &["commit", "-m", message], &envs).await?;
                if !output.success {
                    return Err(IceyError::Store(format!(
                        "git commit failed: {}",
                        output.stderr.trim()
                    )));
                }
            }
            _ => {
                return Err(IceyError::Store(format!(
                    "git diff --cached failed: {}",
                    staged.stderr.trim()
                )));
            }
        }

        self.git(&["push"]).await?;
        tracing::info!("Pushed '{}' ({} files)", message, files.len());
        Ok(())
    }

    async fn lock(&self, path: &str) -> Result<LockStatus> {
        let output = self.run(&self.root, &["lfs", "lock", path], &[]).await?;
        if output.success {
            return Ok(LockStatus::Acquired);
        }

        let locks = self.list_locks().await?;
        if locks.iter().any(|entry| entry.path == path) {
            return Ok(LockStatus::AlreadyLocked);
        }

        Err(IceyError::lock(path, output.stderr.trim()))
    }

    async fn unlock(&self, path: &str, force: bool) -> Result<UnlockStatus> {
        let mut args = vec!["lfs", "unlock"];
        if force {
            args.push("--force");
        }
        args.push(path);

        let output = self.run(&self.root, &args, &[]).await?;
        if output.success {
            return Ok(UnlockStatus::Released);
        }

        if !force && self.has_local_changes(path).await? {
            return Ok(UnlockStatus::UncommittedChanges);
        }

        Err(IceyError::lock(path, output.stderr.trim()))
    }

    async fn list_locks(&self) -> Result<Vec<LockEntry>> {
        let output = self.git(&["lfs", "locks", "--json"]).await?;
        parse_locks(&output.stdout)
    }
}

fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
        key.display()
    )
}

fn parse_locks(json: &str) -> Result<Vec<LockEntry>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    let locks: Vec<LfsLock> = serde_json::from_str(json)
        .map_err(|error| IceyError::Store(format!("unreadable lock list: {}", error)))?;

    Ok(locks
        .into_iter()
        .map(|lock| LockEntry {
            path: lock.path,
            owner: lock.owner.map(|owner| owner.name).unwrap_or_default(),
        })
        .collect())
}
