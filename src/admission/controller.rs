//! The memory admission controller.
//!
//! Gates allocations against an absolute memory limit and a tiered set of
//! per-priority token buckets, queueing requests that cannot be served
//! immediately and waking the oldest one first as budget frees up.

use std::sync::Arc;
use std::time::Instant as StdInstant;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::observability::Logger;

use super::errors::{AdmissionError, AdmissionResult};
use super::priority::{Priority, PRIORITY_COUNT};
use super::rate_limit::RateLimitCell;
use super::wait_queue::WaitQueue;

struct Inner {
    enabled: bool,
    limit: usize,
    used: usize,
    cells: [RateLimitCell; PRIORITY_COUNT],
    queues: [WaitQueue; PRIORITY_COUNT],
}

impl Inner {
    /// True iff disabled, or the request fits the memory limit and every
    /// cell from `priority_index` down through the lowest tier has some
    /// budget.
    fn may_use(&self, priority_index: usize, size: usize) -> bool {
        if !self.enabled {
            return true;
        }
        let fits_memory = self.limit == 0 || self.used + size <= self.limit;
        fits_memory
            && (priority_index..PRIORITY_COUNT).all(|idx| self.cells[idx].has_budget())
    }

    fn do_use(&mut self, priority_index: usize, size: usize) {
        self.used += size;
        for idx in priority_index..PRIORITY_COUNT {
            self.cells[idx].charge(size);
        }
    }

    fn is_exceeded(&self) -> bool {
        self.limit > 0 && self.used > self.limit
    }
}

/// Owns the shared quota state and the background refill task.
pub struct Controller {
    inner: Arc<Mutex<Inner>>,
    on_exceeded: Arc<dyn Fn() + Send + Sync>,
    too_long_threshold: Duration,
    refill_task: JoinHandle<()>,
}

impl Controller {
    /// Creates a controller with the given absolute memory limit (`0`
    /// means unbounded) and refill tick period. The controller starts
    /// disabled: admission is a no-op (but `used` is still tracked) until
    /// `enable` is called. `on_exceeded` is invoked, synchronously and
    /// non-suspending, whenever a charging operation leaves `used` over
    /// `limit` — the embedder's cue to kick off reclamation.
    pub fn create(
        limit: usize,
        refill_period: Duration,
        too_long_threshold: Duration,
        on_exceeded: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            enabled: false,
            limit,
            used: 0,
            cells: Default::default(),
            queues: Default::default(),
        }));
        let on_exceeded: Arc<dyn Fn() + Send + Sync> = Arc::new(on_exceeded);

        let refill_inner = inner.clone();
        let refill_on_exceeded = on_exceeded.clone();
        let refill_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refill_period);
            loop {
                ticker.tick().await;
                let mut guard = refill_inner.lock().await;
                for cell in guard.cells.iter_mut() {
                    cell.refill(refill_period);
                }
                Self::signal_locked(&mut guard);
                Self::notify_if_still_exceeded(&guard, &refill_on_exceeded);
            }
        });

        Self {
            inner,
            on_exceeded,
            too_long_threshold,
            refill_task,
        }
    }

    /// Switches to enforcing and starts the refill timer. Immediately
    /// re-checks the limit against whatever `used` accumulated while
    /// disabled.
    pub async fn enable(&self) {
        let mut inner = self.inner.lock().await;
        inner.enabled = true;
        if inner.is_exceeded() {
            (self.on_exceeded)();
        }
    }

    /// Stops the refill task. Equivalent to dropping the controller;
    /// provided for symmetry with `create`.
    pub fn destroy(self) {}

    pub async fn used(&self) -> usize {
        self.inner.lock().await.used
    }

    pub async fn limit(&self) -> usize {
        self.inner.lock().await.limit
    }

    pub async fn set_limit(&self, limit: usize) {
        let mut inner = self.inner.lock().await;
        inner.limit = limit;
        Self::signal_locked(&mut inner);
    }

    pub async fn set_rate_limit(&self, priority: Priority, bytes_per_second: f64) {
        let mut inner = self.inner.lock().await;
        let idx = match priority {
            Priority::Tx => 0,
            Priority::Compaction | Priority::All => 1,
        };
        inner.cells[idx].set_rate(bytes_per_second);
        Self::signal_locked(&mut inner);
    }

    /// Unconditionally adds `size` to `used` and debits every applicable
    /// rate cell, then re-checks the limit. Never blocks; used where the
    /// caller has no alternative (e.g. recovery replay, reclamation
    /// bookkeeping).
    pub async fn force_use(&self, priority: Priority, size: usize) {
        let mut inner = self.inner.lock().await;
        let idx = priority_floor(priority);
        inner.do_use(idx, size);
        if inner.is_exceeded() {
            (self.on_exceeded)();
        }
    }

    /// Subtracts from `used` only — releases are not producers, so rate
    /// cells are not credited — then signals the wait queues.
    pub async fn release(&self, size: usize) {
        let mut inner = self.inner.lock().await;
        inner.used = inner.used.saturating_sub(size);
        Self::signal_locked(&mut inner);
    }

    /// Reconciles after a reserve-then-allocate sequence. If the
    /// reservation overshot, the delta is released from both `used` and
    /// the rate cells, then the queues are signaled. If it undershot, the
    /// delta is charged to both and the limit is re-checked.
    pub async fn adjust(&self, priority: Priority, reserved: usize, used_actual: usize) {
        let mut inner = self.inner.lock().await;
        let idx = priority_floor(priority);
        if reserved > used_actual {
            let delta = reserved - used_actual;
            inner.used = inner.used.saturating_sub(delta);
            for cell_idx in idx..PRIORITY_COUNT {
                inner.cells[cell_idx].credit(delta);
            }
            Self::signal_locked(&mut inner);
        } else if used_actual > reserved {
            let delta = used_actual - reserved;
            inner.do_use(idx, delta);
            if inner.is_exceeded() {
                (self.on_exceeded)();
            }
        }
    }

    /// Requests permission to use `size` bytes at `priority`, waiting up
    /// to `timeout` if the memory limit or an applicable rate cell is
    /// currently exhausted.
    ///
    /// A request that could never fit even with `used == 0` fails
    /// immediately as out-of-memory rather than waiting out the full
    /// timeout — that condition cannot be resolved by waiting.
    pub async fn use_(
        &self,
        priority: Priority,
        size: usize,
        timeout: Duration,
    ) -> AdmissionResult<()> {
        let idx = priority.index();
        let enqueued_at = StdInstant::now();
        let rx = {
            let mut inner = self.inner.lock().await;

            if !inner.enabled {
                inner.used += size;
                return Ok(());
            }

            inner.queues[idx].prune_dead_front();
            if inner.queues[idx].is_empty() && inner.may_use(idx, size) {
                inner.do_use(idx, size);
                return Ok(());
            }

            if inner.limit > 0 && size > inner.limit {
                return Err(AdmissionError::out_of_memory(size));
            }

            // Notify the reclaimer before sleeping so dump/compaction can
            // start immediately, not only once the timer ticks. Uses the
            // prospective total, not just the current overage: admitting
            // this request is exactly what would push `used` past the
            // limit.
            if inner.limit > 0 && inner.used + size > inner.limit {
                (self.on_exceeded)();
            }

            let (tx, rx) = oneshot::channel();
            inner.queues[idx].push(size, tx);
            rx
        };

        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            // Charged by the signaler before waking us; nothing left to do.
            Ok(Ok(())) => {
                let waited = enqueued_at.elapsed();
                if waited > self.too_long_threshold {
                    Logger::warn(
                        "ADMISSION_SLOW",
                        &[
                            ("size", &size.to_string()),
                            ("waited_ms", &waited.as_millis().to_string()),
                        ],
                    );
                }
                Ok(())
            }
            Ok(Err(_)) => Err(AdmissionError::timeout(size)),
            Err(_) => Err(AdmissionError::timeout(size)),
        }
    }

    /// Wakes waiters, oldest-enqueued-first across both priority queues,
    /// for as long as the oldest one remaining can be served. Stops at
    /// the first one that cannot, preserving FIFO order within a priority
    /// rather than letting a smaller later request cut the line.
    fn signal_locked(inner: &mut Inner) {
        loop {
            let mut oldest: Option<(usize, StdInstant)> = None;
            for (idx, queue) in inner.queues.iter_mut().enumerate() {
                if let Some(enqueued_at) = queue.front_enqueued_at() {
                    if oldest.map_or(true, |(_, t)| enqueued_at < t) {
                        oldest = Some((idx, enqueued_at));
                    }
                }
            }
            let Some((idx, _)) = oldest else {
                return;
            };

            let size = inner.queues[idx].front_size().unwrap();
            if !inner.may_use(idx, size) {
                return;
            }

            inner.do_use(idx, size);
            inner.queues[idx].pop_and_wake();
        }
    }

    /// Re-nudges the reclaimer on every refill tick while some queue's
    /// head still can't fit under the memory limit, not only at the
    /// moment it enqueued. A single reclamation pass may free less than a
    /// waiter needs; without this, a waiter that gets no further
    /// `use_`/`force_use`/`adjust` call to ride along with would time out
    /// even though repeated nudging could have driven `used` down first.
    fn notify_if_still_exceeded(inner: &Inner, on_exceeded: &Arc<dyn Fn() + Send + Sync>) {
        if inner.limit == 0 {
            return;
        }
        let still_blocked = inner.queues.iter().any(|queue| {
            queue
                .front_size()
                .map_or(false, |size| inner.used + size > inner.limit)
        });
        if still_blocked {
            on_exceeded();
        }
    }
}

/// `All` updates only the lowest tier (see [`Priority::applicable_cells`]).
fn priority_floor(priority: Priority) -> usize {
    priority.applicable_cells().start
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}
