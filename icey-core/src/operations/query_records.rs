use super::{bitmap_paths, list_record_ids};
use crate::bitmap::{BitmapStore, Tally, stats, tally};
use crate::error::Result;
use crate::record::{Artifact, RecordId, validate_subject};
use crate::sharding::PathSharding;
use crate::store::VersionedStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::fs;

#[derive(Clone)]
pub struct QueryRecordsOperation {
    store: Arc<dyn VersionedStore>,
    sharding: PathSharding,
    bitmaps: Arc<BitmapStore>,
}

#[derive(Debug, Clone)]
pub struct QueryRecordsOperationRequest {
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct QueryRecordItem {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub content: Bytes,
    pub percent: u8,
    pub tally: Tally,
}

#[derive(Debug, Clone)]
pub struct QueryRecordsOperationResult {
    /// Newest first.
    pub items: Vec<QueryRecordItem>,
}

impl QueryRecordsOperation {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        sharding: PathSharding,
        bitmaps: Arc<BitmapStore>,
    ) -> Self {
        Self {
            store,
            sharding,
            bitmaps,
        }
    }

    /// Read every record of a subject without locking; concurrent writers
    /// may leave partially updated records, which are returned as found.
    pub async fn run(
        &self,
        request: QueryRecordsOperationRequest,
    ) -> Result<QueryRecordsOperationResult> {
        let QueryRecordsOperationRequest { subject } = request;
        validate_subject(&subject)?;

        self.store.pull().await?;

        let shard = self.sharding.shard(&subject)?;
        let mut ids = list_record_ids(&shard.absolute, Artifact::Content).await?;
        ids.sort_by_key(|id| Reverse((id.timestamp_ms(), id.unique().to_string())));

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let content_path = shard.absolute_file(&id.file_name(Artifact::Content));
            let content = match fs::read(&content_path).await {
                Ok(data) => Bytes::from(data),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };

            let (bm, bmi) = self.bitmaps.read_lenient(&bitmap_paths(&shard, &id)).await?;
            let created_at =
                DateTime::from_timestamp_millis(id.timestamp_ms() as i64).unwrap_or_default();
            items.push(QueryRecordItem {
                created_at,
                percent: stats(&bm, &bmi),
                tally: tally(&bm, &bmi),
                content,
                id,
            });
        }

        tracing::debug!("Query for subject {} found {} records", subject, items.len());
        Ok(QueryRecordsOperationResult { items })
    }
}
