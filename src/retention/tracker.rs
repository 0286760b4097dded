//! The retention tracker.
//!
//! Tracks the minimum in-use log position across all registered consumers
//! and pushes the resulting deletion frontier to the snapshot engine and
//! the WAL. See the module-level documentation in `retention::mod` for the
//! frontier computation and forced-eviction algorithms this implements.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::collaborators::{
    CheckpointRegistry, ReplicaHandle, SnapshotEngine, WalSink, INFINITE_SIGNATURE, Signature,
};
use super::consumer::{ConsumerHandle, ConsumerId, ConsumerRecord, ConsumerType};
use super::errors::{RetentionError, RetentionResult};
use crate::observability::Logger;

/// Tracks registered consumers and the deletion frontier derived from them.
///
/// A single `Tracker` is meant to be owned by one task; concurrent access
/// from multiple tasks requires the embedder to wrap it (e.g. in an
/// `Arc<tokio::sync::Mutex<Tracker>>`), same as the rest of this crate's
/// single-threaded-cooperative model.
pub struct Tracker {
    checkpoint_count: u32,
    wal_frontier: Signature,
    checkpoint_frontier: Signature,
    order: BTreeSet<(Signature, ConsumerId)>,
    records: HashMap<ConsumerId, ConsumerRecord>,
    gc_latch: Mutex<()>,
    snapshot_engine: Arc<dyn SnapshotEngine>,
    wal_sink: Arc<dyn WalSink>,
    checkpoint_registry: Arc<dyn CheckpointRegistry>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("checkpoint_count", &self.checkpoint_count)
            .field("wal_frontier", &self.wal_frontier)
            .field("checkpoint_frontier", &self.checkpoint_frontier)
            .field("order", &self.order)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Initializes frontier state to the "never run" sentinel, with an
    /// empty consumer set.
    pub fn new(
        checkpoint_count: u32,
        snapshot_engine: Arc<dyn SnapshotEngine>,
        wal_sink: Arc<dyn WalSink>,
        checkpoint_registry: Arc<dyn CheckpointRegistry>,
    ) -> RetentionResult<Self> {
        if checkpoint_count < 1 {
            return Err(RetentionError::invalid_checkpoint_count(checkpoint_count));
        }
        Ok(Self {
            checkpoint_count,
            wal_frontier: -1,
            checkpoint_frontier: -1,
            order: BTreeSet::new(),
            records: HashMap::new(),
            gc_latch: Mutex::new(()),
            snapshot_engine,
            wal_sink,
            checkpoint_registry,
        })
    }

    /// Releases every registered consumer, clearing their replica
    /// back-references. Equivalent to dropping the tracker; provided as an
    /// explicit operation for symmetry with `new`.
    pub fn shutdown(self) {}

    pub fn checkpoint_frontier(&self) -> Signature {
        self.checkpoint_frontier
    }

    pub fn wal_frontier(&self) -> Signature {
        self.wal_frontier
    }

    pub fn consumer_count(&self) -> usize {
        self.records.len()
    }

    /// Takes effect on the next `run`.
    pub fn set_checkpoint_count(&mut self, n: u32) -> RetentionResult<()> {
        if n < 1 {
            return Err(RetentionError::invalid_checkpoint_count(n));
        }
        self.checkpoint_count = n;
        Ok(())
    }

    /// Registers a new consumer pinned at `signature`. Never advances the
    /// frontier by itself.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
        kind: ConsumerType,
        replica: Option<Arc<dyn ReplicaHandle>>,
    ) -> ConsumerHandle {
        let id = ConsumerId::next();
        self.order.insert((signature, id));
        self.records.insert(
            id,
            ConsumerRecord {
                id,
                name: name.into(),
                signature,
                kind,
                replica,
            },
        );
        ConsumerHandle(id)
    }

    /// Removes and destroys a consumer, clearing its replica
    /// back-reference. Triggers `run` if the removed consumer was (or
    /// tied) the leftmost.
    pub async fn unregister(&mut self, handle: ConsumerHandle) -> RetentionResult<()> {
        let id = handle.id();
        let record = self
            .records
            .remove(&id)
            .ok_or_else(RetentionError::consumer_not_found)?;
        // Captured before removal: a post-removal `>` comparison misses a
        // tie at the minimum, since the tied sibling keeps the leftmost
        // signature unchanged.
        let was_leftmost = self.leftmost_signature() == record.signature;
        self.order.remove(&(record.signature, id));
        if let Some(replica) = &record.replica {
            replica.clear_gc_consumer();
        }

        if was_leftmost {
            self.run().await;
        }
        Ok(())
    }

    /// Advances a consumer's pinned signature. No-op if `new_signature`
    /// equals the current one. Triggers `run` if the consumer's old
    /// signature was (or tied) the minimum.
    ///
    /// # Panics
    ///
    /// Panics if `new_signature` is less than the consumer's current
    /// signature — signatures must be monotonically non-decreasing.
    pub async fn advance(
        &mut self,
        handle: ConsumerHandle,
        new_signature: Signature,
    ) -> RetentionResult<()> {
        let id = handle.id();
        let prev_signature = self
            .records
            .get(&id)
            .ok_or_else(RetentionError::consumer_not_found)?
            .signature;

        assert!(
            new_signature >= prev_signature,
            "consumer signature must never decrease (was {prev_signature}, got {new_signature})"
        );
        if new_signature == prev_signature {
            return Ok(());
        }

        // Captured before the reorder: a consumer tied at the minimum
        // still has `prev_signature == old_min` even though it isn't the
        // set's unique leftmost, and moving it away from that tie can
        // change `leftmost_ckpt_sig` just as much as moving the unique
        // leftmost would.
        let old_min = self.leftmost_signature();

        self.order.remove(&(prev_signature, id));
        self.order.insert((new_signature, id));
        self.records.get_mut(&id).unwrap().signature = new_signature;

        if prev_signature == old_min {
            self.run().await;
        }
        Ok(())
    }

    /// Computes a new deletion frontier and dispatches it to the snapshot
    /// engine and the WAL, in that order.
    pub async fn run(&mut self) {
        let leftmost_sig = self.leftmost_signature();
        let leftmost_ckpt_sig = self.leftmost_checkpoint_signature();

        let ckpt_frontier = self.compute_checkpoint_frontier(leftmost_ckpt_sig);
        let wal_frontier = ckpt_frontier.min(leftmost_sig);

        if wal_frontier <= self.wal_frontier && ckpt_frontier <= self.checkpoint_frontier {
            return; // nothing to do
        }

        // Engine callbacks may suspend on file I/O; serialize concurrent
        // passes so the same file is never asked to be deleted twice.
        let _guard = self.gc_latch.lock().await;

        let mut snapshot_failed = false;
        if ckpt_frontier > self.checkpoint_frontier {
            self.checkpoint_frontier = ckpt_frontier;
            if let Err(e) = self.snapshot_engine.collect_garbage(ckpt_frontier).await {
                snapshot_failed = true;
                Logger::error(
                    "RETENTION_SNAPSHOT_GC_FAILED",
                    &[
                        ("signature", &ckpt_frontier.to_string()),
                        ("reason", &e.reason),
                    ],
                );
            }
        }
        if !snapshot_failed && wal_frontier > self.wal_frontier {
            self.wal_frontier = wal_frontier;
            self.wal_sink.collect_garbage(wal_frontier).await;
        }
    }

    /// Forced eviction: invoked when the file layer reports it needs space
    /// immediately. Deletes replica-bound consumers older than the
    /// preserved checkpoint window; never touches consumers with no
    /// replica binding (e.g. backup readers).
    pub async fn xdir_clean_notify(&mut self) {
        let Some((_, mut leftmost_id)) = self.order.iter().next().copied() else {
            return;
        };
        if self.records[&leftmost_id].replica.is_none() {
            return;
        }

        let mut iter = self.checkpoint_registry.checkpoints_newest_first();
        let mut oldest_preserved = None;
        for _ in 0..self.checkpoint_count {
            oldest_preserved = match iter.next() {
                Some(c) => Some(c.signature),
                None => return, // not enough checkpoints exist yet
            };
        }
        drop(iter);
        let oldest_preserved =
            oldest_preserved.expect("checkpoint_count was validated to be >= 1 at construction");

        // Captured once: the original semantics re-check every subsequent
        // leftmost against this initial value, not a freshly recomputed
        // `oldest_preserved` (see DESIGN.md on Open Question (b)).
        let initial_signature = self.records[&leftmost_id].signature;
        if initial_signature >= oldest_preserved {
            return;
        }

        loop {
            let record = &self.records[&leftmost_id];
            let replica = record
                .replica
                .clone()
                .expect("checked before entering/continuing the loop");
            Logger::error(
                "RETENTION_FORCED_EVICTION",
                &[
                    ("replica_uuid", &replica.uuid().to_string()),
                    ("signature", &record.signature.to_string()),
                ],
            );

            let _ = self.unregister(ConsumerHandle(leftmost_id)).await;

            match self.order.iter().next().copied() {
                None => break,
                Some((_, next_id)) => {
                    let next = &self.records[&next_id];
                    if next.replica.is_none() || next.signature > initial_signature {
                        break;
                    }
                    leftmost_id = next_id;
                }
            }
        }

        self.run().await;
    }

    fn leftmost_signature(&self) -> Signature {
        self.order
            .iter()
            .next()
            .map(|(sig, _)| *sig)
            .unwrap_or(INFINITE_SIGNATURE)
    }

    fn leftmost_checkpoint_signature(&self) -> Signature {
        self.order
            .iter()
            .find(|(_, id)| self.records[id].is_snapshot_consumer())
            .map(|(sig, _)| *sig)
            .unwrap_or(INFINITE_SIGNATURE)
    }

    /// Walks checkpoints newest-to-oldest, skipping the `checkpoint_count`
    /// youngest, and returns the first one at or below `leftmost_ckpt_sig`.
    /// Returns `-1` if none qualifies.
    fn compute_checkpoint_frontier(&self, leftmost_ckpt_sig: Signature) -> Signature {
        let mut remaining = self.checkpoint_count as i64;
        for ckpt in self.checkpoint_registry.checkpoints_newest_first() {
            remaining -= 1;
            if remaining > 0 {
                continue;
            }
            if ckpt.signature > leftmost_ckpt_sig {
                continue;
            }
            return ckpt.signature;
        }
        -1
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        for record in self.records.values() {
            if let Some(replica) = &record.replica {
                replica.clear_gc_consumer();
            }
        }
    }
}
