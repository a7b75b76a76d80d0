use crate::bitmap::{BitmapStore, Vote};
use crate::error::{IceyError, Result};
use crate::operations::{
    DeleteRecordOperation, DeleteRecordOperationRequest, DeleteRecordOperationResult,
    QueryRecordsOperation, QueryRecordsOperationRequest, QueryRecordsOperationResult,
    SubmitRecordOperation, SubmitRecordOperationRequest, SubmitRecordOperationResult,
    VoteRecordOperation, VoteRecordOperationRequest, VoteRecordOperationResult,
};
use crate::record::IdGenerator;
use crate::sharding::PathSharding;
use crate::store::VersionedStore;
use crate::verification::VerificationGate;
use bytes::Bytes;
use std::sync::Arc;

/// Entry point for verified record mutations and reads.
#[derive(Clone)]
pub struct ContentRecordOrchestrator {
    submit: SubmitRecordOperation,
    delete: DeleteRecordOperation,
    vote: VoteRecordOperation,
    query: QueryRecordsOperation,
}

impl ContentRecordOrchestrator {
    /// `store` must be checked out at `sharding.store_dir()`.
    pub fn new(
        store: Arc<dyn VersionedStore>,
        sharding: PathSharding,
        gate: VerificationGate,
        bitmaps: Arc<BitmapStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        if store.root() != sharding.store_dir() {
            return Err(IceyError::Config(format!(
                "store root {} does not match storage layout {}",
                store.root().display(),
                sharding.store_dir().display()
            )));
        }

        Ok(Self {
            submit: SubmitRecordOperation::new(
                store.clone(),
                sharding.clone(),
                gate.clone(),
                bitmaps.clone(),
                ids,
            ),
            delete: DeleteRecordOperation::new(
                store.clone(),
                sharding.clone(),
                gate.clone(),
                bitmaps.clone(),
            ),
            vote: VoteRecordOperation::new(store.clone(), sharding.clone(), gate, bitmaps.clone()),
            query: QueryRecordsOperation::new(store, sharding, bitmaps),
        })
    }

    pub async fn submit(
        &self,
        subject: &str,
        content: impl Into<Bytes>,
        code: &str,
    ) -> Result<SubmitRecordOperationResult> {
        self.submit
            .run(SubmitRecordOperationRequest {
                subject: subject.to_string(),
                content: content.into(),
                code: code.to_string(),
            })
            .await
    }

    pub async fn delete(
        &self,
        subject: &str,
        code: &str,
        token: &str,
    ) -> Result<DeleteRecordOperationResult> {
        self.delete
            .run(DeleteRecordOperationRequest {
                subject: subject.to_string(),
                code: code.to_string(),
                token: token.to_string(),
            })
            .await
    }

    pub async fn vote(
        &self,
        subject: &str,
        id: &str,
        vote: Vote,
        code: &str,
    ) -> Result<VoteRecordOperationResult> {
        self.vote
            .run(VoteRecordOperationRequest {
                subject: subject.to_string(),
                id: id.to_string(),
                vote,
                code: code.to_string(),
            })
            .await
    }

    pub async fn query(&self, subject: &str) -> Result<QueryRecordsOperationResult> {
        self.query
            .run(QueryRecordsOperationRequest {
                subject: subject.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::record::{Artifact, RecordId};
    use crate::store::{LocalStore, LockEntry, LockStatus, UnlockStatus};
    use crate::verification::{CodeStore, DEFAULT_CODE_TTL, MemoryCodeStore, code_key};
    use crate::UlidGenerator;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const SUBJECT: &str = "abc123ef00112233445566778899aabbccddeeff00112233445566778899aabb";

    /// Deterministic ids with increasing timestamps.
    struct SequentialIds(AtomicU64);

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> RecordId {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            RecordId::new(1_700_000_000_000 + n, format!("ID{}", n)).unwrap()
        }
    }

    /// Local store whose push and unlock can be made to fail.
    struct FailingStore {
        inner: LocalStore,
        fail_commit: AtomicBool,
        fail_unlock: AtomicBool,
    }

    impl FailingStore {
        fn new(inner: LocalStore) -> Self {
            Self {
                inner,
                fail_commit: AtomicBool::new(false),
                fail_unlock: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl VersionedStore for FailingStore {
        fn root(&self) -> &Path {
            self.inner.root()
        }

        async fn identity(&self) -> Result<String> {
            self.inner.identity().await
        }

        async fn pull(&self) -> Result<()> {
            self.inner.pull().await
        }

        async fn commit_and_push(&self, files: &[String], message: &str) -> Result<()> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(IceyError::Store("push rejected".to_string()));
            }
            self.inner.commit_and_push(files, message).await
        }

        async fn lock(&self, path: &str) -> Result<LockStatus> {
            self.inner.lock(path).await
        }

        async fn unlock(&self, path: &str, force: bool) -> Result<UnlockStatus> {
            if self.fail_unlock.load(Ordering::SeqCst) {
                return Err(IceyError::Store("lock server unavailable".to_string()));
            }
            self.inner.unlock(path, force).await
        }

        async fn list_locks(&self) -> Result<Vec<LockEntry>> {
            self.inner.list_locks().await
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: LocalStore,
        codes: Arc<MemoryCodeStore>,
        sharding: PathSharding,
        bitmaps: Arc<BitmapStore>,
        records: ContentRecordOrchestrator,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_ids(Arc::new(SequentialIds(AtomicU64::new(0))))
        }

        fn with_ids(ids: Arc<dyn IdGenerator>) -> Self {
            Self::build(ids, |store| Arc::new(store) as Arc<dyn VersionedStore>)
        }

        fn failing() -> (Self, Arc<FailingStore>) {
            let mut failing = None;
            let fixture = Self::build(Arc::new(SequentialIds(AtomicU64::new(0))), |store| {
                let store = Arc::new(FailingStore::new(store));
                failing = Some(store.clone());
                store as Arc<dyn VersionedStore>
            });
            (fixture, failing.unwrap())
        }

        fn build(
            ids: Arc<dyn IdGenerator>,
            wrap: impl FnOnce(LocalStore) -> Arc<dyn VersionedStore>,
        ) -> Self {
            let dir = TempDir::new().unwrap();
            let sharding = PathSharding::new(dir.path(), "icey-storage");
            let store = LocalStore::new(sharding.store_dir(), "icey-a").unwrap();
            let codes = Arc::new(MemoryCodeStore::new());
            let bitmaps = Arc::new(BitmapStore::default());
            let records = ContentRecordOrchestrator::new(
                wrap(store.clone()),
                sharding.clone(),
                VerificationGate::new(codes.clone(), 3),
                bitmaps.clone(),
                ids,
            )
            .unwrap();

            Self {
                _dir: dir,
                store,
                codes,
                sharding,
                bitmaps,
                records,
            }
        }

        async fn seed_code(&self, code: &str) {
            self.codes
                .set(&code_key(SUBJECT, code), 0, DEFAULT_CODE_TTL)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_layout_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("elsewhere"), "icey-a").unwrap();
        let result = ContentRecordOrchestrator::new(
            Arc::new(store),
            PathSharding::new(dir.path(), "icey-storage"),
            VerificationGate::new(Arc::new(MemoryCodeStore::new()), 3),
            Arc::new(BitmapStore::default()),
            Arc::new(UlidGenerator::new()),
        );
        assert!(matches!(result, Err(IceyError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_writes_and_commits_four_artifacts() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;

        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();
        assert_eq!(submitted.id.to_string(), "1700000000000-ID0");
        assert!(submitted.token.ends_with("-ID0"));

        let shard = fixture.sharding.shard(SUBJECT).unwrap();
        for artifact in Artifact::ALL {
            assert!(shard.absolute_file(&submitted.id.file_name(artifact)).exists());
        }
        let content =
            std::fs::read(shard.absolute_file(&submitted.id.file_name(Artifact::Content))).unwrap();
        assert_eq!(content, b"hello");

        let commits = fixture.store.commits().await;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].added.len(), 4);
        assert_eq!(commits[0].message, format!("{}-1700000000000-ID0", SUBJECT));
    }

    #[tokio::test]
    async fn test_invalid_input_is_validation() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;

        let cases = [
            fixture.records.submit("abc", "hello", "000000").await,
            fixture.records.submit(SUBJECT, "", "000000").await,
            fixture.records.submit(SUBJECT, "hello", "00000").await,
        ];
        for result in cases {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        }

        let error = fixture
            .records
            .vote(SUBJECT, "../../etc", Vote::Trusted, "000000")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);

        let error = fixture.records.delete(SUBJECT, "000000", "notoken").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);

        // Nothing consumed the code.
        assert_eq!(
            fixture.codes.get(&code_key(SUBJECT, "000000")).await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_unknown_code_is_verification_failure() {
        let fixture = Fixture::new();
        let error = fixture.records.submit(SUBJECT, "hello", "123456").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::VerificationFailed);
        assert!(fixture.store.commits().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_wrong_token_is_unauthorized() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();

        let forged = format!("AAAA-{}", submitted.id.unique());
        let error = fixture.records.delete(SUBJECT, "000000", &forged).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unauthorized);

        let shard = fixture.sharding.shard(SUBJECT).unwrap();
        assert!(shard.absolute_file(&submitted.id.file_name(Artifact::Credential)).exists());
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;

        let error = fixture.records.delete(SUBJECT, "000000", "AAAA-NOPE").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_vote_updates_stats_and_commits_bitmaps() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();
        let id = submitted.id.to_string();

        let first = fixture.records.vote(SUBJECT, &id, Vote::Trusted, "000000").await.unwrap();
        assert_eq!(first.percent, 100);

        let second = fixture.records.vote(SUBJECT, &id, Vote::Distrusted, "000000").await.unwrap();
        assert_eq!(second.percent, 50);

        let commits = fixture.store.commits().await;
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[2].added.len(), 2);
        assert!(commits[2].message.starts_with("vote update for "));

        // Locks are gone afterwards.
        assert!(fixture.store.list_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_conflicts_with_other_instance() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();

        let shard = fixture.sharding.shard(SUBJECT).unwrap();
        let bmi = shard.relative_file(&submitted.id.file_name(Artifact::Validity));
        let other = fixture.store.with_identity("icey-b");
        assert_eq!(other.lock(&bmi).await.unwrap(), LockStatus::Acquired);

        let error = fixture
            .records
            .vote(SUBJECT, &submitted.id.to_string(), Vote::Trusted, "000000")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::LockConflict);
        assert!(error.is_retryable());

        // Only the other instance's lock survives.
        let locks = fixture.store.list_locks().await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].owner, "icey-b");
    }

    #[tokio::test]
    async fn test_failed_vote_commit_releases_locks() {
        let (fixture, failing) = Fixture::failing();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();

        failing.fail_commit.store(true, Ordering::SeqCst);
        let error = fixture
            .records
            .vote(SUBJECT, &submitted.id.to_string(), Vote::Trusted, "000000")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Storage);
        assert!(fixture.store.list_locks().await.unwrap().is_empty());
        assert_eq!(fixture.store.commits().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_release_keeps_commit_error() {
        let (fixture, failing) = Fixture::failing();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();

        failing.fail_commit.store(true, Ordering::SeqCst);
        failing.fail_unlock.store(true, Ordering::SeqCst);
        let error = fixture
            .records
            .vote(SUBJECT, &submitted.id.to_string(), Vote::Trusted, "000000")
            .await
            .unwrap_err();
        assert!(
            matches!(&error, IceyError::Store(reason) if reason == "push rejected"),
            "unexpected error: {}",
            error
        );

        // Release was attempted on both paths and failed on both.
        let locks = fixture.store.list_locks().await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_waits_for_in_process_vote() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();

        let shard = fixture.sharding.shard(SUBJECT).unwrap();
        let bm = shard.absolute_file(&submitted.id.file_name(Artifact::Bitmap));
        let guard = fixture
            .bitmaps
            .lock_record(&shard.relative_file(&submitted.id.to_string()))
            .await;

        let records = fixture.records.clone();
        let token = submitted.token.clone();
        let delete =
            tokio::spawn(async move { records.delete(SUBJECT, "000000", &token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!delete.is_finished());
        assert!(bm.exists());

        drop(guard);
        let deleted = delete.await.unwrap().unwrap();
        assert_eq!(deleted.removed.len(), 4);
        assert!(!bm.exists());
    }

    #[tokio::test]
    async fn test_concurrent_local_votes_all_land() {
        let fixture = Fixture::new();
        fixture
            .codes
            .set(&code_key(SUBJECT, "000000"), -100, DEFAULT_CODE_TTL)
            .await
            .unwrap();
        let submitted = fixture.records.submit(SUBJECT, "hello", "000000").await.unwrap();
        let id = submitted.id.to_string();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let records = fixture.records.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                records.vote(SUBJECT, &id, Vote::Trusted, "000000").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let query = fixture.records.query(SUBJECT).await.unwrap();
        assert_eq!(query.items[0].tally.total, 8);
    }

    #[tokio::test]
    async fn test_query_orders_newest_first() {
        let fixture = Fixture::new();
        fixture.seed_code("000000").await;
        fixture.records.submit(SUBJECT, "first", "000000").await.unwrap();
        fixture.records.submit(SUBJECT, "second", "000000").await.unwrap();

        let result = fixture.records.query(SUBJECT).await.unwrap();
        let contents: Vec<_> = result.items.iter().map(|item| item.content.clone()).collect();
        assert_eq!(contents, vec![Bytes::from("second"), Bytes::from("first")]);
        assert_eq!(result.items[0].percent, 0);
        assert_eq!(result.items[0].tally.total, 0);
    }

    #[tokio::test]
    async fn test_query_unknown_subject_is_empty() {
        let fixture = Fixture::new();
        let result = fixture.records.query(&"f".repeat(64)).await.unwrap();
        assert!(result.items.is_empty());
    }
}
