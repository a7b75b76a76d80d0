pub mod delete_record;
pub mod query_records;
pub mod submit_record;
pub mod vote_record;

pub use delete_record::{
    DeleteRecordOperation, DeleteRecordOperationRequest, DeleteRecordOperationResult,
};
pub use query_records::{
    QueryRecordItem, QueryRecordsOperation, QueryRecordsOperationRequest,
    QueryRecordsOperationResult,
};
pub use submit_record::{
    SubmitRecordOperation, SubmitRecordOperationRequest, SubmitRecordOperationResult,
};
pub use vote_record::{VoteRecordOperation, VoteRecordOperationRequest, VoteRecordOperationResult};

use crate::bitmap::store::BitmapPaths;
use crate::error::{IceyError, Result};
use crate::record::{Artifact, RecordId};
use crate::sharding::ShardPath;
use crate::verification::VerificationGate;
use std::path::Path;
use tokio::fs;

/// Consume one attempt of `code`, failing when it is not accepted.
async fn require_code(gate: &VerificationGate, subject: &str, code: &str) -> Result<()> {
    if !gate.verify(subject, code).await? {
        return Err(IceyError::VerificationFailed);
    }
    Ok(())
}

/// Store-relative paths of every artifact of a record.
fn artifact_files(shard: &ShardPath, id: &RecordId) -> Vec<String> {
    Artifact::ALL
        .iter()
        .map(|artifact| shard.relative_file(&id.file_name(*artifact)))
        .collect()
}

fn bitmap_paths(shard: &ShardPath, id: &RecordId) -> BitmapPaths {
    BitmapPaths {
        bm: shard.absolute_file(&id.file_name(Artifact::Bitmap)),
        bmi: shard.absolute_file(&id.file_name(Artifact::Validity)),
    }
}

/// Record ids with an `artifact` file in `dir`. A missing directory has none.
async fn list_record_ids(dir: &Path, artifact: Artifact) -> Result<Vec<RecordId>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };

    let suffix = format!(".{}", artifact.extension());
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(&suffix) else {
            continue;
        };
        match RecordId::parse(stem) {
            Ok(id) => ids.push(id),
            Err(_) => tracing::debug!("Skipping unrecognized file {} in {}", name, dir.display()),
        }
    }

    Ok(ids)
}
