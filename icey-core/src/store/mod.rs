//! Shared versioned file store.
//!
//! Every instance works on its own checkout of one shared repository. The
//! store pulls and pushes changesets and exposes an advisory lock registry
//! keyed by repository-relative path.

pub mod factory;
pub mod git;
pub mod local;

pub use factory::StoreBuilder;
pub use git::{CommitAuthor, GitStore};
pub use local::{Changeset, LocalStore};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    /// Somebody, possibly this identity, already holds the lock.
    AlreadyLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Released,
    /// The path has local modifications; only a forced unlock will release it.
    UncommittedChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub path: String,
    pub owner: String,
}

#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Local checkout directory. Relative paths resolve against it.
    fn root(&self) -> &Path;

    /// Owner name this instance holds locks under.
    async fn identity(&self) -> Result<String>;

    /// Fetch the latest state, cloning on first use. No change is success.
    async fn pull(&self) -> Result<()>;

    /// Stage `files` (a missing file stages its deletion), commit and push.
    async fn commit_and_push(&self, files: &[String], message: &str) -> Result<()>;

    async fn lock(&self, path: &str) -> Result<LockStatus>;

    async fn unlock(&self, path: &str, force: bool) -> Result<UnlockStatus>;

    async fn list_locks(&self) -> Result<Vec<LockEntry>>;
}
