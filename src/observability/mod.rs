//! Observability subsystem
//!
//! Structured logging used by the retention tracker and admission
//! controller to report warnings, critical evictions, and diagnostics.
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Deterministic output (fields sorted by key)
//! 4. One log line = one event

mod logger;

pub use logger::{Logger, Severity};
