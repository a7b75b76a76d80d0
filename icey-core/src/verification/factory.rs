use super::{CodeStore, MemoryCodeStore, RedisCodeStore};
use crate::error::{IceyError, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CodeStoreBuilder {
    backend: Option<String>,
    redis_url: Option<String>,
}

impl CodeStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
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
                "code store backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub async fn build(&self) -> Result<Arc<dyn CodeStore>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(IceyError::Config(
                        "redis url is required for redis code store".to_string(),
                    ));
                }

                let store = RedisCodeStore::new(url).await?;
                Ok(Arc::new(store))
            }
            "memory" => {
                tracing::warn!("Using in-memory code store; codes are not shared between instances");
                Ok(Arc::new(MemoryCodeStore::new()))
            }
            other => Err(IceyError::Config(format!(
                "unsupported code store backend: {}",
                other
            ))),
        }
    }
}
