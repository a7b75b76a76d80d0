use crate::error::{IceyError, Result};
use std::path::{Path, PathBuf};

/// Number of leading identifier characters used for directory fan-out.
pub const SHARD_PREFIX_LEN: usize = 6;

/// Location of a subject directory inside the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPath {
    /// `<root>/<namespace>/<s1>/<s2>/<s3>/<id>` on the local disk.
    pub absolute: PathBuf,
    /// `<s1>/<s2>/<s3>/<id>`, always `/`-separated so every instance derives
    /// the same lock and commit paths.
    pub relative: String,
}

impl ShardPath {
    /// Relative path of a file inside this directory.
    pub fn relative_file(&self, file_name: &str) -> String {
        format!("{}/{}", self.relative, file_name)
    }

    pub fn absolute_file(&self, file_name: &str) -> PathBuf {
        self.absolute.join(file_name)
    }
}

/// Maps content identifiers onto the sharded storage layout.
#[derive(Debug, Clone)]
pub struct PathSharding {
    root: PathBuf,
    namespace: String,
}

impl PathSharding {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    /// Directory holding the shared store checkout.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split the first six characters of `id` into three two-character
    /// directory levels.
    pub fn shard(&self, id: &str) -> Result<ShardPath> {
        let relative = relative_shard(id)?;
        let absolute = self.store_dir().join(&relative);
        Ok(ShardPath { absolute, relative })
    }
}

fn relative_shard(id: &str) -> Result<String> {
    if id.len() < SHARD_PREFIX_LEN || !id.as_bytes()[..SHARD_PREFIX_LEN].is_ascii() {
        return Err(IceyError::InvalidRequest(format!(
            "identifier must start with at least {} single-byte characters",
            SHARD_PREFIX_LEN
        )));
    }

    if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(IceyError::InvalidRequest(
            "identifier must be a single path component".to_string(),
        ));
    }

    let (s1, s2, s3) = (&id[0..2], &id[2..4], &id[4..6]);
    Ok(format!("{}/{}/{}/{}", s1, s2, s3, id))
}
