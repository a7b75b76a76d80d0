use icey_core::bitmap::{BLOCK_SIZE, DEFAULT_BITMAP_SIZE};
use icey_core::store::git::{DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME};
use icey_core::verification::{DEFAULT_CODE_TTL, DEFAULT_MAX_ATTEMPTS};
use icey_core::{CommitAuthor, IceyError, PathSharding, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub repository: RepositoryConfig,
    pub code_store: CodeStoreConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Shared store checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,
    pub clone_path: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    #[serde(default)]
    pub lock_owner: Option<String>,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl RepositoryConfig {
    pub fn sharding(&self) -> PathSharding {
        PathSharding::new(&self.clone_path, &self.namespace)
    }

    pub fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}

fn default_namespace() -> String {
    "icey-storage".to_string()
}

fn default_author_name() -> String {
    DEFAULT_AUTHOR_NAME.to_string()
}

fn default_author_email() -> String {
    DEFAULT_AUTHOR_EMAIL.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    Git,
    Local,
}

impl RepositoryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryBackend::Git => "git",
            RepositoryBackend::Local => "local",
        }
    }
}

/// Verification code store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeStoreConfig {
    pub backend: CodeStoreBackend,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStoreBackend {
    Redis,
    Memory,
}

impl CodeStoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStoreBackend::Redis => "redis",
            CodeStoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            code_ttl_secs: default_code_ttl_secs(),
        }
    }
}

impl VerificationConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

fn default_max_attempts() -> i64 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_code_ttl_secs() -> u64 {
    DEFAULT_CODE_TTL.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_bitmap_size")]
    pub bitmap_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bitmap_size: default_bitmap_size(),
        }
    }
}

fn default_bitmap_size() -> usize {
    DEFAULT_BITMAP_SIZE
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("ICEY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| IceyError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| IceyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository.namespace.trim().is_empty() {
            return Err(IceyError::Config(
                "repository.namespace cannot be empty".to_string(),
            ));
        }

        if self.repository.backend == RepositoryBackend::Git
            && self
                .repository
                .url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            return Err(IceyError::Config(
                "repository.url is required for git backend".to_string(),
            ));
        }

        if self.code_store.backend == CodeStoreBackend::Redis
            && self
                .code_store
                .redis
                .as_ref()
                .is_none_or(|redis| redis.url.trim().is_empty())
        {
            return Err(IceyError::Config(
                "code_store.redis.url is required for redis backend".to_string(),
            ));
        }

        if self.verification.max_attempts < 1 {
            return Err(IceyError::Config(
                "verification.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.verification.code_ttl_secs == 0 {
            return Err(IceyError::Config(
                "verification.code_ttl_secs must be positive".to_string(),
            ));
        }

        let size = self.storage.bitmap_size;
        if size < DEFAULT_BITMAP_SIZE || size % BLOCK_SIZE != 0 {
            return Err(IceyError::Config(format!(
                "storage.bitmap_size must be a multiple of {} and at least {}, got {}",
                BLOCK_SIZE, DEFAULT_BITMAP_SIZE, size
            )));
        }

        Ok(())
    }
}
