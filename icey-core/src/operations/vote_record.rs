use super::{bitmap_paths, require_code};
use crate::bitmap::{BitmapStore, InsertOutcome, Vote, stats};
use crate::error::{IceyError, Result};
use crate::lock::DistributedFileLock;
use crate::record::{Artifact, RecordId, validate_code, validate_subject};
use crate::sharding::PathSharding;
use crate::store::VersionedStore;
use crate::verification::VerificationGate;
use std::sync::Arc;
use tokio::fs;

#[derive(Clone)]
pub struct VoteRecordOperation {
    store: Arc<dyn VersionedStore>,
    sharding: PathSharding,
    gate: VerificationGate,
    bitmaps: Arc<BitmapStore>,
    lock: DistributedFileLock,
}

#[derive(Debug, Clone)]
pub struct VoteRecordOperationRequest {
    pub subject: String,
    pub id: String,
    pub vote: Vote,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct VoteRecordOperationResult {
    pub id: RecordId,
    pub outcome: InsertOutcome,
    /// Trusted share after the vote, 0..=100.
    pub percent: u8,
}

impl VoteRecordOperation {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        sharding: PathSharding,
        gate: VerificationGate,
        bitmaps: Arc<BitmapStore>,
    ) -> Self {
        Self {
            lock: DistributedFileLock::new(store.clone()),
            store,
            sharding,
            gate,
            bitmaps,
        }
    }

    pub async fn run(&self, request: VoteRecordOperationRequest) -> Result<VoteRecordOperationResult> {
        let VoteRecordOperationRequest {
            subject,
            id,
            vote,
            code,
        } = request;

        validate_subject(&subject)?;
        validate_code(&code)?;
        let id = RecordId::parse(&id)?;

        require_code(&self.gate, &subject, &code).await?;
        self.store.pull().await?;

        let shard = self.sharding.shard(&subject)?;
        let paths = bitmap_paths(&shard, &id);
        let bm = shard.relative_file(&id.file_name(Artifact::Bitmap));
        let bmi = shard.relative_file(&id.file_name(Artifact::Validity));

        // Must precede the distributed lock: its self-heal would otherwise
        // take the lock away from a local holder under the same identity.
        let guard = self.bitmaps.lock_record(&shard.relative_file(&id.to_string())).await;
        if !fs::try_exists(&paths.bm).await? || !fs::try_exists(&paths.bmi).await? {
            return Err(IceyError::RecordNotFound(id.to_string()));
        }
        self.lock.acquire_pair(&bm, &bmi).await?;

        let applied = async {
            let outcome = self.bitmaps.apply_vote(&guard, &paths, vote).await?;
            self.store
                .commit_and_push(
                    &[bm.clone(), bmi.clone()],
                    &format!("vote update for {}-{}", subject, id),
                )
                .await?;
            Ok::<_, IceyError>(outcome)
        }
        .await;

        if let Err(error) = self.lock.release_pair(&bm, &bmi).await {
            tracing::warn!("Failed to release vote locks for {}: {}", id, error);
        }

        let outcome = applied?;
        let (bm_bytes, bmi_bytes) = self.bitmaps.read(&paths).await?;
        let percent = stats(&bm_bytes, &bmi_bytes);
        drop(guard);

        tracing::info!(
            "Recorded {:?} vote on {} for subject {}: {:?}, now {}%",
            vote,
            id,
            subject,
            outcome,
            percent
        );
        Ok(VoteRecordOperationResult {
            id,
            outcome,
            percent,
        })
    }
}
