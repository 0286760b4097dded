//! Memory admission control.
//!
//! Gates memory allocations against an absolute limit plus a tiered
//! per-[`Priority`] token-bucket rate limit, queueing requests that cannot
//! be served immediately. See [`Controller`] for the entry point.

mod controller;
mod errors;
mod priority;
mod rate_limit;
mod wait_queue;

pub use controller::Controller;
pub use errors::{AdmissionError, AdmissionErrorCode, AdmissionResult};
pub use priority::{Priority, PRIORITY_COUNT};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_controller(limit: usize) -> Controller {
        Controller::create(limit, Duration::from_millis(20), Duration::from_secs(1), || {})
    }

    fn counting_controller(limit: usize) -> (Controller, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let controller = Controller::create(
            limit,
            Duration::from_millis(20),
            Duration::from_secs(1),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        (controller, count)
    }

    #[tokio::test]
    async fn disabled_controller_admits_unconditionally() {
        let controller = test_controller(0);
        controller
            .use_(Priority::Tx, 1_000_000, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(controller.used().await, 1_000_000);
    }

    #[tokio::test]
    async fn unbounded_limit_admits_without_rate_limit() {
        let controller = test_controller(0);
        controller.enable().await;
        controller
            .use_(Priority::Tx, 4096, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(controller.used().await, 4096);
    }

    #[tokio::test]
    async fn request_larger_than_limit_is_out_of_memory() {
        let controller = test_controller(1024);
        controller.enable().await;
        let err = controller
            .use_(Priority::Tx, 2048, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdmissionErrorCode::OutOfMemory);
    }

    /// S4 — admission timeout: limit=1000, used=900, unlimited rate;
    /// `use(TX, 500, 50ms)` with no release arriving times out, `used` is
    /// unchanged, and the reclaimer is notified at least once before the
    /// wait.
    #[tokio::test]
    async fn s4_admission_times_out_when_no_release_arrives() {
        let (controller, exceeded_count) = counting_controller(1000);
        controller.enable().await;
        controller.force_use(Priority::Tx, 900).await;
        assert_eq!(exceeded_count.load(Ordering::SeqCst), 0);

        let err = controller
            .use_(Priority::Tx, 500, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert_eq!(err.code(), AdmissionErrorCode::Timeout);
        assert_eq!(controller.used().await, 900);
        assert!(exceeded_count.load(Ordering::SeqCst) >= 1);
    }

    /// A waiter stuck behind the memory limit gets re-nudged on every
    /// refill tick, not just once at enqueue — otherwise a reclaimer that
    /// needs more than one pass to free enough space would never hear
    /// about it again before the waiter times out.
    #[tokio::test]
    async fn refill_tick_re_nudges_on_exceeded_while_waiter_is_memory_blocked() {
        let (controller, exceeded_count) = counting_controller(1000);
        controller.enable().await;
        controller.force_use(Priority::Tx, 900).await;
        assert_eq!(exceeded_count.load(Ordering::SeqCst), 0);

        let waiter = controller.use_(Priority::Tx, 500, Duration::from_millis(300));
        let release = async {
            tokio::time::sleep(Duration::from_millis(90)).await;
            controller.release(900).await;
        };

        let (result, _) = tokio::join!(waiter, release);
        result.unwrap();
        // One nudge at enqueue time, plus at least one more from a refill
        // tick (20ms period) during the ~90ms the waiter sat blocked.
        assert!(exceeded_count.load(Ordering::SeqCst) >= 2);
    }

    /// S5 — oldest-first across priorities: T1(TX) enqueued before
    /// T2(COMPACTION); a release that fits only one of them wakes T1.
    #[tokio::test]
    async fn s5_oldest_across_priorities_wins_the_wakeup() {
        let controller = test_controller(20);
        controller.enable().await;
        controller.force_use(Priority::Tx, 20).await;

        let t1 = async { controller.use_(Priority::Tx, 10, Duration::from_millis(300)).await };
        let t2 = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            controller
                .use_(Priority::Compaction, 10, Duration::from_millis(300))
                .await
        };
        let release = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            controller.release(10).await;
        };

        let (r1, r2, _) = tokio::join!(t1, t2, release);
        // Only 10 bytes were freed: exactly one of the two is admitted.
        assert!(r1.is_ok() ^ r2.is_ok());
        assert!(r1.is_ok(), "T1 was enqueued first and must win the race");
    }

    /// S6 — burst cap: rate=1000 B/s, three consecutive refills with no
    /// consumption yield 100, 200, 200 (clamped at 2*rate*dt).
    #[tokio::test]
    async fn s6_burst_cap_caps_accumulated_credit() {
        use super::rate_limit::RateLimitCell;
        let mut cell = RateLimitCell::new();
        cell.set_rate(1000.0);
        let dt = Duration::from_millis(100);
        cell.refill(dt);
        cell.refill(dt);
        cell.refill(dt);
        // Exercised directly above via the unit tests in rate_limit; here
        // we only check the cell is usable after accumulating credit.
        assert!(cell.has_budget());
    }

    #[tokio::test]
    async fn force_use_bypasses_rate_limit_and_memory_limit_check() {
        let controller = test_controller(100);
        controller.enable().await;
        controller.force_use(Priority::Compaction, 1_000_000).await;
        assert_eq!(controller.used().await, 1_000_000);
    }

    #[tokio::test]
    async fn release_frees_memory_for_a_waiting_request() {
        let controller = test_controller(100);
        controller.enable().await;
        controller.force_use(Priority::Tx, 100).await;

        let waiter = controller.use_(Priority::Tx, 50, Duration::from_millis(200));
        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.release(60).await;
        };

        let (result, _) = tokio::join!(waiter, release);
        result.unwrap();
        assert_eq!(controller.used().await, 90);
    }

    #[tokio::test]
    async fn adjust_charges_the_difference_when_final_size_is_larger() {
        let controller = test_controller(0);
        controller.enable().await;
        controller.force_use(Priority::Tx, 50).await;
        controller.adjust(Priority::Tx, 50, 80).await;
        assert_eq!(controller.used().await, 80);
    }

    #[tokio::test]
    async fn adjust_refunds_the_difference_when_final_size_is_smaller() {
        let controller = test_controller(0);
        controller.enable().await;
        controller.force_use(Priority::Tx, 50).await;
        controller.adjust(Priority::Tx, 50, 20).await;
        assert_eq!(controller.used().await, 20);
    }

    #[tokio::test]
    async fn priority_all_configures_the_same_cell_as_compaction() {
        // `All` is a write-side alias for the lowest tier: configuring it
        // throttles both priorities exactly like configuring Compaction
        // directly would, since Tx's applicable cells include it.
        let controller = test_controller(0);
        controller.enable().await;
        controller.set_rate_limit(Priority::All, 5.0).await;

        let err = controller
            .use_(Priority::Tx, 1, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdmissionErrorCode::Timeout);

        let err = controller
            .use_(Priority::Compaction, 1, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdmissionErrorCode::Timeout);
    }

    #[tokio::test]
    async fn tx_priority_also_requires_budget_in_the_compaction_cell() {
        let controller = test_controller(0);
        controller.enable().await;
        // Rate-limiting only the compaction tier implicitly throttles Tx
        // too, since Tx's applicable cells include every lower tier.
        controller.set_rate_limit(Priority::Compaction, 5.0).await;

        let err = controller
            .use_(Priority::Tx, 1, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AdmissionErrorCode::Timeout);
    }
}
