use super::{artifact_files, list_record_ids, require_code};
use crate::bitmap::BitmapStore;
use crate::credential::{split_owner_token, verify_credential};
use crate::error::{IceyError, Result};
use crate::record::{Artifact, RecordId, validate_code, validate_subject, validate_unique_id};
use crate::sharding::PathSharding;
use crate::store::VersionedStore;
use crate::verification::VerificationGate;
use std::sync::Arc;
use tokio::fs;

#[derive(Clone)]
pub struct DeleteRecordOperation {
    store: Arc<dyn VersionedStore>,
    sharding: PathSharding,
    gate: VerificationGate,
    bitmaps: Arc<BitmapStore>,
}

#[derive(Debug, Clone)]
pub struct DeleteRecordOperationRequest {
    pub subject: String,
    pub code: String,
    /// Composite owner token returned by submit.
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct DeleteRecordOperationResult {
    pub id: RecordId,
    /// Store-relative paths that were removed.
    pub removed: Vec<String>,
}

impl DeleteRecordOperation {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        sharding: PathSharding,
        gate: VerificationGate,
        bitmaps: Arc<BitmapStore>,
    ) -> Self {
        Self {
            store,
            sharding,
            gate,
            bitmaps,
        }
    }

    pub async fn run(
        &self,
        request: DeleteRecordOperationRequest,
    ) -> Result<DeleteRecordOperationResult> {
        let DeleteRecordOperationRequest {
            subject,
            code,
            token,
        } = request;

        validate_subject(&subject)?;
        validate_code(&code)?;
        let (raw_token, unique) = split_owner_token(&token)?;
        validate_unique_id(unique)?;

        require_code(&self.gate, &subject, &code).await?;
        self.store.pull().await?;

        let shard = self.sharding.shard(&subject)?;
        let id = list_record_ids(&shard.absolute, Artifact::Credential)
            .await?
            .into_iter()
            .find(|id| id.unique() == unique)
            .ok_or_else(|| IceyError::RecordNotFound(unique.to_string()))?;

        let stored = fs::read_to_string(shard.absolute_file(&id.file_name(Artifact::Credential)))
            .await?;
        if !verify_credential(&stored, &subject, raw_token) {
            tracing::info!("Rejected delete of record {} for subject {}", id, subject);
            return Err(IceyError::Unauthorized);
        }

        // Serializes against in-process votes rewriting the bitmap pair.
        let guard = self.bitmaps.lock_record(&shard.relative_file(&id.to_string())).await;
        let mut removed = Vec::new();
        for (artifact, relative) in Artifact::ALL.iter().zip(artifact_files(&shard, &id)) {
            let path = shard.absolute_file(&id.file_name(*artifact));
            match fs::remove_file(&path).await {
                Ok(()) => removed.push(relative),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }

        if removed.is_empty() {
            tracing::debug!("Record {} had no files left to remove", id);
        } else {
            self.store
                .commit_and_push(&removed, &format!("delete {}-{}", subject, id))
                .await?;
        }
        drop(guard);

        tracing::info!("Deleted record {} for subject {}", id, subject);
        Ok(DeleteRecordOperationResult { id, removed })
    }
}
