use super::{DEFAULT_BITMAP_SIZE, InsertOutcome, Vote, insert_vote};
use crate::error::{IceyError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;

/// Reads and writes `.bm`/`.bmi` pairs on local disk.
///
/// Access to a pair is serialized in-process by [`BitmapStore::lock_record`];
/// the distributed lock only keeps other instances out.
pub struct BitmapStore {
    size: usize,
    records: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a record's bitmaps are read, updated and committed.
pub struct RecordGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl RecordGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The two files backing one record's tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPaths {
    pub bm: PathBuf,
    pub bmi: PathBuf,
}

impl Default for BitmapStore {
    fn default() -> Self {
        Self::new(DEFAULT_BITMAP_SIZE)
    }
}

impl BitmapStore {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for exclusive in-process access to the record identified by `key`.
    pub async fn lock_record(&self, key: &str) -> RecordGuard {
        let mutex = {
            let mut records = self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries nobody holds or waits on are dropped.
            records.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            records
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        RecordGuard {
            key: key.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Write a zeroed pair of the configured size.
    pub async fn create_empty(&self, paths: &BitmapPaths) -> Result<()> {
        let zeros = vec![0u8; self.size];
        write_atomic(&paths.bm, &zeros).await?;
        write_atomic(&paths.bmi, &zeros).await?;
        Ok(())
    }

    /// Read both files of a pair, failing with `RecordNotFound` if either is
    /// missing.
    pub async fn read(&self, paths: &BitmapPaths) -> Result<(Vec<u8>, Vec<u8>)> {
        let bm = read_required(&paths.bm).await?;
        let bmi = read_required(&paths.bmi).await?;
        Ok((bm, bmi))
    }

    /// Read both files of a pair, treating missing files as empty.
    pub async fn read_lenient(&self, paths: &BitmapPaths) -> Result<(Vec<u8>, Vec<u8>)> {
        let bm = read_optional(&paths.bm).await?;
        let bmi = read_optional(&paths.bmi).await?;
        Ok((bm, bmi))
    }

    pub async fn write(&self, paths: &BitmapPaths, bm: &[u8], bmi: &[u8]) -> Result<()> {
        write_atomic(&paths.bm, bm).await?;
        write_atomic(&paths.bmi, bmi).await?;
        Ok(())
    }

    /// Read, insert `vote` and persist the pair. The caller must hold the
    /// record guard.
    pub async fn apply_vote(
        &self,
        _guard: &RecordGuard,
        paths: &BitmapPaths,
        vote: Vote,
    ) -> Result<InsertOutcome> {
        let (mut bm, mut bmi) = self.read(paths).await?;
        let outcome = insert_vote(&mut bm, &mut bmi, vote)?;
        self.write(paths, &bm, &bmi).await?;

        tracing::debug!("Applied vote {:?} to {}: {:?}", vote, paths.bm.display(), outcome);
        Ok(outcome)
    }
}

async fn read_required(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(data) => Ok(data),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(IceyError::RecordNotFound(path.display().to_string()))
        }
        Err(error) => Err(error.into()),
    }
}

async fn read_optional(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(data) => Ok(data),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

/// Write to a sibling temporary file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IceyError::Internal(format!("invalid file path {}", path.display())))?;
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{Overflow, stats};
    use std::time::Duration;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> BitmapPaths {
        BitmapPaths {
            bm: dir.path().join("1-a.bm"),
            bmi: dir.path().join("1-a.bmi"),
        }
    }

    #[tokio::test]
    async fn test_create_and_vote() {
        let dir = TempDir::new().unwrap();
        let store = BitmapStore::default();
        let paths = paths(&dir);

        store.create_empty(&paths).await.unwrap();
        let (bm, bmi) = store.read(&paths).await.unwrap();
        assert_eq!(bm, vec![0u8; 512]);
        assert_eq!(bmi, vec![0u8; 512]);

        let guard = store.lock_record("1-a").await;
        let outcome = store.apply_vote(&guard, &paths, Vote::Trusted).await.unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Recorded {
                slot: 256,
                overflow: Overflow::None
            }
        );

        let (bm, bmi) = store.read(&paths).await.unwrap();
        assert_eq!(bm.len(), 512);
        assert_eq!(stats(&bm, &bmi), 100);
        assert!(!dir.path().join("1-a.bm.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_pair() {
        let dir = TempDir::new().unwrap();
        let store = BitmapStore::default();
        let paths = paths(&dir);

        let error = store.read(&paths).await.unwrap_err();
        assert!(matches!(error, IceyError::RecordNotFound(_)));

        let (bm, bmi) = store.read_lenient(&paths).await.unwrap();
        assert!(bm.is_empty() && bmi.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_pair_is_internal() {
        let dir = TempDir::new().unwrap();
        let store = BitmapStore::default();
        let paths = paths(&dir);
        store.write(&paths, &[0u8; 512], &[0u8; 256]).await.unwrap();

        let guard = store.lock_record("1-a").await;
        let error = store
            .apply_vote(&guard, &paths, Vote::Trusted)
            .await
            .unwrap_err();
        assert!(matches!(error, IceyError::Internal(_)));
    }

    #[tokio::test]
    async fn test_record_lock_serializes() {
        let store = Arc::new(BitmapStore::default());
        let guard = store.lock_record("1-a").await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_record("1-a").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other records are not blocked.
        let other = store.lock_record("2-b").await;
        assert_eq!(other.key(), "2-b");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_votes_on_one_record() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BitmapStore::default());
        let paths = paths(&dir);
        store.create_empty(&paths).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let paths = paths.clone();
            handles.push(tokio::spawn(async move {
                let guard = store.lock_record("1-a").await;
                store.apply_vote(&guard, &paths, Vote::Trusted).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (_, bmi) = store.read(&paths).await.unwrap();
        assert_eq!(bmi.iter().filter(|&&b| b == 1).count(), 16);
    }
}
