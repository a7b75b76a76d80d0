use super::{CommitAuthor, GitStore, LocalStore, VersionedStore};
use crate::error::{IceyError, Result};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_LOCAL_IDENTITY: &str = "icey-local";

#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    backend: Option<String>,
    root: Option<PathBuf>,
    url: Option<String>,
    ssh_key: Option<PathBuf>,
    lock_owner: Option<String>,
    author: Option<CommitAuthor>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Checkout directory, usually `PathSharding::store_dir()`.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    pub fn lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = Some(owner.into());
        self
    }

    pub fn author(mut self, author: CommitAuthor) -> Self {
        self.author = Some(author);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(IceyError::Config(
                "repository backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    fn resolve_lock_owner(&self) -> Option<String> {
        self.lock_owner
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(str::to_string)
    }

    pub fn build(&self) -> Result<Arc<dyn VersionedStore>> {
        let backend = self.resolve_backend()?;
        let root = self
            .root
            .clone()
            .ok_or_else(|| IceyError::Config("repository root is required".to_string()))?;

        match backend.as_str() {
            "git" => {
                let url = self.url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(IceyError::Config(
                        "repository url is required for git backend".to_string(),
                    ));
                }

                let mut store = GitStore::new(root, Some(url.to_string()))
                    .with_author(self.author.clone().unwrap_or_default());
                if let Some(key) = &self.ssh_key {
                    store = store.with_ssh_key(key.clone());
                }
                if let Some(owner) = self.resolve_lock_owner() {
                    store = store.with_lock_owner(owner);
                }
                Ok(Arc::new(store))
            }
            "local" => {
                tracing::warn!(
                    "Using local repository at {}; changes are not pushed anywhere",
                    root.display()
                );
                let identity = self
                    .resolve_lock_owner()
                    .unwrap_or_else(|| DEFAULT_LOCAL_IDENTITY.to_string());
                Ok(Arc::new(LocalStore::new(root, identity)?))
            }
            other => Err(IceyError::Config(format!(
                "unsupported repository backend: {}",
                other
            ))),
        }
    }
}
