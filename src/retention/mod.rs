//! WAL/checkpoint retention tracking.
//!
//! Computes the oldest log position still needed by any registered
//! consumer (a replica, a backup, an anchored reader) and pushes that
//! frontier down to the snapshot engine and the WAL as it advances. See
//! [`Tracker`] for the entry point.

mod collaborators;
mod consumer;
mod errors;
mod tracker;

pub use collaborators::{
    CheckpointInfo, CheckpointRegistry, ReplicaHandle, Signature, SnapshotEngine, SnapshotGcError,
    WalSink, INFINITE_SIGNATURE,
};
pub use consumer::{ConsumerHandle, ConsumerType};
pub use errors::{RetentionError, RetentionErrorCode, RetentionResult, Severity as ErrorSeverity};
pub use tracker::Tracker;
