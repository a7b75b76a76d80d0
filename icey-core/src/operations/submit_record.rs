use super::{artifact_files, bitmap_paths, require_code};
use crate::bitmap::BitmapStore;
use crate::bitmap::store::write_atomic;
use crate::credential::{compose_owner_token, generate_token, hash_credential};
use crate::error::{IceyError, Result};
use crate::record::{Artifact, IdGenerator, RecordId, validate_code, validate_subject};
use crate::sharding::PathSharding;
use crate::store::VersionedStore;
use crate::verification::VerificationGate;
use bytes::Bytes;
use std::sync::Arc;
use tokio::fs;

#[derive(Clone)]
pub struct SubmitRecordOperation {
    store: Arc<dyn VersionedStore>,
    sharding: PathSharding,
    gate: VerificationGate,
    bitmaps: Arc<BitmapStore>,
    ids: Arc<dyn IdGenerator>,
}

#[derive(Debug, Clone)]
pub struct SubmitRecordOperationRequest {
    pub subject: String,
    pub content: Bytes,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct SubmitRecordOperationResult {
    pub id: RecordId,
    /// `<raw token>-<unique id>`; the only copy of the raw token.
    pub token: String,
}

impl SubmitRecordOperation {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        sharding: PathSharding,
        gate: VerificationGate,
        bitmaps: Arc<BitmapStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            sharding,
            gate,
            bitmaps,
            ids,
        }
    }

    pub async fn run(
        &self,
        request: SubmitRecordOperationRequest,
    ) -> Result<SubmitRecordOperationResult> {
        let SubmitRecordOperationRequest {
            subject,
            content,
            code,
        } = request;

        validate_subject(&subject)?;
        validate_code(&code)?;
        if content.is_empty() {
            return Err(IceyError::InvalidRequest(
                "content cannot be empty".to_string(),
            ));
        }

        require_code(&self.gate, &subject, &code).await?;
        self.store.pull().await?;

        let shard = self.sharding.shard(&subject)?;
        fs::create_dir_all(&shard.absolute).await?;

        let id = self.ids.next_id();
        let raw_token = generate_token();
        let credential = hash_credential(&subject, &raw_token);

        write_atomic(&shard.absolute_file(&id.file_name(Artifact::Content)), &content).await?;
        self.bitmaps.create_empty(&bitmap_paths(&shard, &id)).await?;
        write_atomic(
            &shard.absolute_file(&id.file_name(Artifact::Credential)),
            credential.as_bytes(),
        )
        .await?;

        // Files stay on disk if the push fails; the next pull reconciles.
        let files = artifact_files(&shard, &id);
        self.store
            .commit_and_push(&files, &format!("{}-{}", subject, id))
            .await?;

        tracing::info!("Submitted record {} for subject {}", id, subject);
        Ok(SubmitRecordOperationResult {
            token: compose_owner_token(&raw_token, id.unique()),
            id,
        })
    }
}
