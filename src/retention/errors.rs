//! Retention tracker error types.

use std::fmt;

/// Severity of a retention error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, tracker state is unaffected.
    Error,
    /// The tracker's invariants would be violated if ignored.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Retention-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionErrorCode {
    /// `set_checkpoint_count` called with n < 1.
    InvalidCheckpointCount,
    /// A handle was used after its consumer was unregistered.
    ConsumerNotFound,
    /// The snapshot engine failed a `run()` pass.
    SnapshotGcFailed,
}

impl RetentionErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            RetentionErrorCode::InvalidCheckpointCount => "RETENTION_INVALID_CHECKPOINT_COUNT",
            RetentionErrorCode::ConsumerNotFound => "RETENTION_CONSUMER_NOT_FOUND",
            RetentionErrorCode::SnapshotGcFailed => "RETENTION_SNAPSHOT_GC_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RetentionErrorCode::InvalidCheckpointCount => Severity::Error,
            RetentionErrorCode::ConsumerNotFound => Severity::Error,
            RetentionErrorCode::SnapshotGcFailed => Severity::Error,
        }
    }
}

impl fmt::Display for RetentionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Retention tracker error with full context.
#[derive(Debug)]
pub struct RetentionError {
    code: RetentionErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RetentionError {
    pub fn invalid_checkpoint_count(n: u32) -> Self {
        Self {
            code: RetentionErrorCode::InvalidCheckpointCount,
            message: format!("checkpoint_count must be >= 1, got {n}"),
            source: None,
        }
    }

    pub fn consumer_not_found() -> Self {
        Self {
            code: RetentionErrorCode::ConsumerNotFound,
            message: "consumer handle is no longer registered".to_string(),
            source: None,
        }
    }

    pub fn snapshot_gc_failed(
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: RetentionErrorCode::SnapshotGcFailed,
            message: "snapshot engine rejected a garbage collection pass".to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn code(&self) -> RetentionErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for RetentionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code, self.message)
    }
}

impl std::error::Error for RetentionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type RetentionResult<T> = Result<T, RetentionError>;
