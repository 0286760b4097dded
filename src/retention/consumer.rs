//! Consumer records tracked by the retention tracker.
//!
//! A consumer pins a signature (a vclock-sum cursor into the WAL) so that
//! garbage collection never removes a WAL segment or checkpoint a reader
//! still depends on. Consumers are exclusively owned by the tracker; a
//! replica only ever holds a [`ReplicaHandle`](super::collaborators::ReplicaHandle)
//! that gets told when its consumer goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::collaborators::{ReplicaHandle, Signature};

/// Identifies a consumer independent of its signature, used as the stable
/// tie-break in the ordered set and as the public handle embedders hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

impl ConsumerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a consumer holds back WAL segments only, or WAL segments and
/// checkpoints alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerType {
    /// Pins WAL segments; does not prevent checkpoint collection.
    WalOnly,
    /// Pins both WAL segments and checkpoints (e.g. a replica that also
    /// restores from snapshots).
    WalAndSnapshot,
}

/// A registered pin. Opaque to embedders beyond the accessors below; the
/// tracker is the sole owner.
pub(crate) struct ConsumerRecord {
    pub id: ConsumerId,
    pub name: String,
    pub signature: Signature,
    pub kind: ConsumerType,
    pub replica: Option<Arc<dyn ReplicaHandle>>,
}

impl std::fmt::Debug for ConsumerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("kind", &self.kind)
            .field("replica", &self.replica.as_ref().map(|_| "<ReplicaHandle>"))
            .finish()
    }
}

impl ConsumerRecord {
    pub fn is_snapshot_consumer(&self) -> bool {
        matches!(self.kind, ConsumerType::WalAndSnapshot)
    }
}

/// Public handle returned by [`Tracker::register`](super::tracker::Tracker::register).
///
/// Cloning a handle does not duplicate the consumer; all clones refer to
/// the same registered pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerHandle(pub(crate) ConsumerId);

impl ConsumerHandle {
    pub fn id(&self) -> ConsumerId {
        self.0
    }
}
