//! External collaborators the retention tracker depends on.
//!
//! None of these are implemented by this crate: the actual file removal,
//! the checkpoint registry's storage, and replica bookkeeping all live
//! downstream. Only the interfaces the tracker calls through are modeled
//! here, as `async_trait` traits so tests can substitute in-memory fakes.

use async_trait::async_trait;
use uuid::Uuid;

/// A vclock-sum scalar: monotonically non-decreasing per consumer.
/// `-1` is the tracker's own "never run" sentinel, never a real consumer
/// signature.
pub type Signature = i64;

/// Stands in for the mathematical "no consumer pins anything" infinity.
pub const INFINITE_SIGNATURE: Signature = i64::MAX;

/// Returned by [`SnapshotEngine::collect_garbage`] when the downstream
/// engine could not complete the collection pass.
#[derive(Debug, thiserror::Error)]
#[error("snapshot engine failed to collect garbage up to signature {signature}: {reason}")]
pub struct SnapshotGcError {
    pub signature: Signature,
    pub reason: String,
}

/// The snapshot/checkpoint engine. Asked to delete every checkpoint at or
/// below `signature`; may suspend (it does real file I/O) and may fail.
#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    async fn collect_garbage(&self, signature: Signature) -> Result<(), SnapshotGcError>;
}

/// The write-ahead log. Collection is infallible to the caller: errors are
/// absorbed and logged inside the WAL's own implementation.
#[async_trait]
pub trait WalSink: Send + Sync {
    async fn collect_garbage(&self, signature: Signature);
}

/// One entry as seen from the tracker: only the scalar signature matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub signature: Signature,
}

/// Iterates the checkpoint registry, newest first, mirroring the
/// registry's own on-disk insertion order.
pub trait CheckpointRegistry: Send + Sync {
    fn checkpoints_newest_first(&self) -> Box<dyn Iterator<Item = CheckpointInfo> + '_>;
}

/// The opaque replica descriptor. The tracker only ever touches its
/// `gc_consumer` back-pointer slot, cleared when the owning consumer is
/// destroyed.
pub trait ReplicaHandle: Send + Sync {
    fn uuid(&self) -> Uuid;
    fn clear_gc_consumer(&self);
}
