use icey_core::verification::{DEFAULT_CODE_TTL, DEFAULT_MAX_ATTEMPTS, code_key};
use icey_core::{
    Artifact, BitmapStore, CodeIssuer, CodeStore, ContentRecordOrchestrator, ErrorKind,
    LocalStore, MemoryCodeStore, PathSharding, UlidGenerator, VerificationGate, VersionedStore,
    Vote,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

const SUBJECT: &str = "abc123ef00112233445566778899aabbccddeeff00112233445566778899aabb";

struct Instance {
    store: LocalStore,
    records: ContentRecordOrchestrator,
}

fn instance(store: LocalStore, sharding: &PathSharding, codes: Arc<MemoryCodeStore>) -> Instance {
    let records = ContentRecordOrchestrator::new(
        Arc::new(store.clone()),
        sharding.clone(),
        VerificationGate::new(codes, DEFAULT_MAX_ATTEMPTS),
        Arc::new(BitmapStore::default()),
        Arc::new(UlidGenerator::new()),
    )
    .unwrap();
    Instance { store, records }
}

async fn seed(codes: &MemoryCodeStore, code: &str) {
    codes
        .set(&code_key(SUBJECT, code), 0, DEFAULT_CODE_TTL)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_submit_vote_query_delete() {
    let dir = TempDir::new().unwrap();
    let sharding = PathSharding::new(dir.path(), "icey-storage");
    let codes = Arc::new(MemoryCodeStore::new());
    let node = instance(
        LocalStore::new(sharding.store_dir(), "icey-a").unwrap(),
        &sharding,
        codes.clone(),
    );

    seed(&codes, "000000").await;
    let submitted = assert_ok!(node.records.submit(SUBJECT, "hello", "000000").await);
    assert_eq!(submitted.token.matches('-').count(), 1);
    let id = submitted.id.to_string();

    let voted = assert_ok!(node.records.vote(SUBJECT, &id, Vote::Trusted, "000000").await);
    assert_eq!(voted.percent, 100);
    let voted = assert_ok!(node.records.vote(SUBJECT, &id, Vote::Trusted, "000000").await);
    assert_eq!(voted.percent, 100);

    let listed = assert_ok!(node.records.query(SUBJECT).await);
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].id, submitted.id);
    assert_eq!(&listed.items[0].content[..], b"hello");
    assert_eq!(listed.items[0].tally.trusted, 2);

    // The first code is exhausted after three uses.
    let error = node
        .records
        .delete(SUBJECT, "000000", &submitted.token)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::VerificationFailed);

    seed(&codes, "111111").await;
    let deleted = assert_ok!(node.records.delete(SUBJECT, "111111", &submitted.token).await);
    assert_eq!(deleted.removed.len(), 4);

    let shard = sharding.shard(SUBJECT).unwrap();
    for artifact in Artifact::ALL {
        assert!(!shard.absolute_file(&submitted.id.file_name(artifact)).exists());
    }

    let error = node
        .records
        .vote(SUBJECT, &id, Vote::Trusted, "111111")
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    assert!(assert_ok!(node.records.query(SUBJECT).await).items.is_empty());

    let commits = node.store.commits().await;
    assert_eq!(commits.len(), 4);
    assert_eq!(commits[3].removed.len(), 4);
}

#[tokio::test]
async fn test_issued_code_gates_submit() {
    let dir = TempDir::new().unwrap();
    let sharding = PathSharding::new(dir.path(), "icey-storage");
    let codes = Arc::new(MemoryCodeStore::new());
    let node = instance(
        LocalStore::new(sharding.store_dir(), "icey-a").unwrap(),
        &sharding,
        codes.clone(),
    );

    let issued = assert_ok!(
        CodeIssuer::new(codes.clone(), DEFAULT_CODE_TTL)
            .issue("breaking: water is wet")
            .await
    );
    assert_ok!(
        node.records
            .submit(&issued.subject, "citation needed", &issued.code)
            .await
    );
}

#[tokio::test]
async fn test_instances_conflict_on_held_lock() {
    let dir = TempDir::new().unwrap();
    let sharding = PathSharding::new(dir.path(), "icey-storage");
    let codes = Arc::new(MemoryCodeStore::new());
    let store_a = LocalStore::new(sharding.store_dir(), "icey-a").unwrap();
    let store_b = store_a.with_identity("icey-b");
    let a = instance(store_a, &sharding, codes.clone());
    let b = instance(store_b, &sharding, codes.clone());

    seed(&codes, "000000").await;
    let submitted = assert_ok!(a.records.submit(SUBJECT, "hello", "000000").await);
    let shard = sharding.shard(SUBJECT).unwrap();
    let bm = shard.relative_file(&submitted.id.file_name(Artifact::Bitmap));

    // Instance A is mid-vote on the record.
    assert_ok!(a.store.lock(&bm).await);

    let error = b
        .records
        .vote(SUBJECT, &submitted.id.to_string(), Vote::Distrusted, "000000")
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::LockConflict);
    assert!(error.is_retryable());

    let locks = assert_ok!(b.store.list_locks().await);
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].owner, "icey-a");

    assert_ok!(a.store.unlock(&bm, false).await);
    let voted = assert_ok!(
        b.records
            .vote(SUBJECT, &submitted.id.to_string(), Vote::Distrusted, "000000")
            .await
    );
    assert_eq!(voted.percent, 0);
}
