use super::{LockEntry, LockStatus, UnlockStatus, VersionedStore};
use crate::error::{IceyError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One recorded commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub message: String,
    pub author: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Default)]
struct Shared {
    locks: Mutex<BTreeMap<String, String>>,
    commits: Mutex<Vec<Changeset>>,
    dirty: Mutex<HashSet<String>>,
}

/// Single-host store over a plain directory.
///
/// Handles created with [`LocalStore::with_identity`] share the lock table
/// and commit log, standing in for several instances on one checkout.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    identity: String,
    shared: Arc<Shared>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, identity: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            identity: identity.into(),
            shared: Arc::new(Shared::default()),
        })
    }

    /// Another handle on the same directory and lock table.
    pub fn with_identity(&self, identity: impl Into<String>) -> Self {
        Self {
            root: self.root.clone(),
            identity: identity.into(),
            shared: self.shared.clone(),
        }
    }

    pub async fn commits(&self) -> Vec<Changeset> {
        self.shared.commits.lock().await.clone()
    }

    /// Mark `path` as modified but not yet committed, so a plain unlock
    /// reports [`UnlockStatus::UncommittedChanges`].
    pub async fn mark_dirty(&self, path: &str) {
        self.shared.dirty.lock().await.insert(path.to_string());
    }
}

#[async_trait]
impl VersionedStore for LocalStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn identity(&self) -> Result<String> {
        Ok(self.identity.clone())
    }

    async fn pull(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn commit_and_push(&self, files: &[String], message: &str) -> Result<()> {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for file in files {
            if tokio::fs::try_exists(self.root.join(file)).await? {
                added.push(file.clone());
            } else {
                removed.push(file.clone());
            }
        }

        {
            let mut dirty = self.shared.dirty.lock().await;
            for file in files {
                dirty.remove(file);
            }
        }

        if added.is_empty() && removed.is_empty() {
            tracing::debug!("Nothing staged for '{}', skipping commit", message);
            return Ok(());
        }

        self.shared.commits.lock().await.push(Changeset {
            message: message.to_string(),
            author: self.identity.clone(),
            added,
            removed,
        });
        Ok(())
    }

    async fn lock(&self, path: &str) -> Result<LockStatus> {
        let mut locks = self.shared.locks.lock().await;
        if locks.contains_key(path) {
            return Ok(LockStatus::AlreadyLocked);
        }
        locks.insert(path.to_string(), self.identity.clone());
        Ok(LockStatus::Acquired)
    }

    async fn unlock(&self, path: &str, force: bool) -> Result<UnlockStatus> {
        let mut locks = self.shared.locks.lock().await;
        let Some(owner) = locks.get(path) else {
            return Err(IceyError::lock(path, "not locked"));
        };

        if !force {
            if *owner != self.identity {
                return Err(IceyError::lock(path, format!("owned by {}", owner)));
            }
            if self.shared.dirty.lock().await.contains(path) {
                return Ok(UnlockStatus::UncommittedChanges);
            }
        }

        locks.remove(path);
        Ok(UnlockStatus::Released)
    }

    async fn list_locks(&self) -> Result<Vec<LockEntry>> {
        let locks = self.shared.locks.lock().await;
        Ok(locks
            .iter()
            .map(|(path, owner)| LockEntry {
                path: path.clone(),
                owner: owner.clone(),
            })
            .collect())
    }
}
