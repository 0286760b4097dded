//! Governor configuration.
//!
//! Deserialized once at startup from the embedder's configuration file and
//! handed to the retention tracker and the admission controller at
//! construction time.

use std::time::Duration;

use serde::Deserialize;

fn default_checkpoint_count() -> u32 {
    2
}

fn default_refill_period_ms() -> u64 {
    100
}

fn default_too_long_threshold_ms() -> u64 {
    1000
}

/// Per-priority rate limit, in bytes per second. `0.0` means unlimited.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub tx_bytes_per_second: f64,
    #[serde(default)]
    pub compaction_bytes_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tx_bytes_per_second: 0.0,
            compaction_bytes_per_second: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    /// How many of the most recent checkpoints the retention tracker
    /// never collects, regardless of what consumers allow.
    #[serde(default = "default_checkpoint_count")]
    pub checkpoint_count: u32,

    /// Absolute memory limit in bytes for the admission controller. `0`
    /// means unbounded.
    #[serde(default)]
    pub memory_limit_bytes: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// How often the admission controller's token buckets refill.
    #[serde(default = "default_refill_period_ms")]
    pub refill_period_ms: u64,

    /// Requests that wait longer than this are logged as slow admissions.
    #[serde(default = "default_too_long_threshold_ms")]
    pub too_long_threshold_ms: u64,
}

impl GovernorConfig {
    pub fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }

    pub fn too_long_threshold(&self) -> Duration {
        Duration::from_millis(self.too_long_threshold_ms)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            checkpoint_count: default_checkpoint_count(),
            memory_limit_bytes: 0,
            rate_limit: RateLimitConfig::default(),
            refill_period_ms: default_refill_period_ms(),
            too_long_threshold_ms: default_too_long_threshold_ms(),
        }
    }
}
