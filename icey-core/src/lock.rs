//! Advisory locks on paths of the shared store.
//!
//! Acquisition clears stale self-held locks and never waits on another
//! holder: a conflict is returned to the caller, who decides whether to
//! retry.

use crate::error::{IceyError, Result};
use crate::store::{LockStatus, UnlockStatus, VersionedStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct DistributedFileLock {
    store: Arc<dyn VersionedStore>,
}

impl DistributedFileLock {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    pub async fn acquire(&self, path: &str) -> Result<()> {
        // Safe to repeat: drop anything this identity left behind.
        if let Err(error) = self.release(path).await {
            tracing::debug!("Pre-acquire release of {} ignored: {}", path, error);
        }

        match self.store.lock(path).await? {
            LockStatus::Acquired => {
                tracing::debug!("Locked {}", path);
                return Ok(());
            }
            LockStatus::AlreadyLocked => {}
        }

        let owner = self.owner_of(path).await?;
        let identity = self.store.identity().await?;

        if owner.as_deref() != Some(identity.as_str()) {
            return Err(IceyError::LockConflict {
                path: path.to_string(),
                owner,
            });
        }

        tracing::info!("Clearing stale lock on {} held by {}", path, identity);
        self.store.unlock(path, true).await?;

        match self.store.lock(path).await? {
            LockStatus::Acquired => {
                tracing::debug!("Locked {} after clearing stale lock", path);
                Ok(())
            }
            LockStatus::AlreadyLocked => {
                let owner = self.owner_of(path).await?;
                Err(IceyError::LockConflict {
                    path: path.to_string(),
                    owner,
                })
            }
        }
    }

    pub async fn release(&self, path: &str) -> Result<()> {
        match self.store.unlock(path, false).await? {
            UnlockStatus::Released => {}
            UnlockStatus::UncommittedChanges => {
                tracing::debug!("{} has uncommitted changes, forcing unlock", path);
                self.store.unlock(path, true).await?;
            }
        }
        tracing::debug!("Unlocked {}", path);
        Ok(())
    }

    pub async fn is_locked(&self, path: &str) -> Result<bool> {
        Ok(self.owner_of(path).await?.is_some())
    }

    /// Acquire both paths or neither.
    pub async fn acquire_pair(&self, first: &str, second: &str) -> Result<()> {
        self.acquire(first).await?;

        if let Err(error) = self.acquire(second).await {
            if let Err(rollback) = self.release(first).await {
                tracing::warn!(
                    "Failed to roll back lock on {} after {} failed: {}",
                    first,
                    second,
                    rollback
                );
            }
            return Err(error);
        }

        Ok(())
    }

    /// Release both paths, reporting the first failure.
    pub async fn release_pair(&self, first: &str, second: &str) -> Result<()> {
        let first_result = self.release(first).await;
        let second_result = self.release(second).await;
        first_result.and(second_result)
    }

    async fn owner_of(&self, path: &str) -> Result<Option<String>> {
        let locks = self.store.list_locks().await?;
        Ok(locks
            .into_iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.owner))
    }
}
