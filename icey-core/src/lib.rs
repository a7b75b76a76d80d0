//! Icey Core - verified content records with a bounded trust tally
//!
//! Anonymous submitters post content under a content hash; every mutation
//! is gated by a one-time code and written to a shared versioned store that
//! several server instances may use at once:
//! - one-time codes with bounded attempts (`verification`)
//! - sharded on-disk layout per subject (`sharding`)
//! - fixed-size trust/distrust bitmaps (`bitmap`)
//! - advisory locks with self-healing and pair rollback (`lock`)
//! - submit, delete, vote and query (`operations`, `orchestrator`)

pub mod bitmap;
pub mod credential;
pub mod error;
pub mod lock;
pub mod operations;
pub mod orchestrator;
pub mod record;
pub mod sharding;
pub mod store;
pub mod verification;

pub use bitmap::{BitmapStore, InsertOutcome, Overflow, Tally, Vote};
pub use error::{ErrorKind, IceyError, Result};
pub use lock::DistributedFileLock;
pub use operations::{
    DeleteRecordOperationResult, QueryRecordItem, QueryRecordsOperationResult,
    SubmitRecordOperationResult, VoteRecordOperationResult,
};
pub use orchestrator::ContentRecordOrchestrator;
pub use record::{Artifact, IdGenerator, RecordId, UlidGenerator};
pub use sharding::{PathSharding, ShardPath};
pub use store::{
    CommitAuthor, GitStore, LocalStore, LockEntry, LockStatus, StoreBuilder, UnlockStatus,
    VersionedStore,
};
pub use verification::{
    CodeIssuer, CodeStore, CodeStoreBuilder, IssuedCode, MemoryCodeStore, RedisCodeStore,
    VerificationGate,
};
