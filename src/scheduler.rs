//! Single-active-batch guard and the scheduled ingest loop.
//!
//! At most one indexing batch runs per process. The guard is a compare-and-
//! swap over an atomic flag; both the HTTP trigger and the scheduled loop go
//! through it, and whichever loses the race skips its pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{BatchOptions, Pipeline};

#[derive(Default)]
pub struct BatchGuard {
    active: AtomicBool,
}

/// Held for the duration of a batch; releases the guard on drop, including
/// on panic or cancellation.
pub struct BatchPermit {
    guard: Arc<BatchGuard>,
}

impl BatchGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the guard. Returns `None` when a batch is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<BatchPermit> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(BatchPermit {
                guard: self.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for BatchPermit {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

/// Run batches on a fixed interval until the process exits. A pass whose
/// guard claim fails (an on-demand batch is running) is skipped, not queued.
pub async fn run_periodic(pipeline: Pipeline, guard: Arc<BatchGuard>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(permit) = guard.try_begin() else {
            tracing::debug!("scheduled pass skipped, batch already running");
            continue;
        };

        tracing::info!("scheduled ingest pass starting");
        match pipeline.run_batch(&BatchOptions::default()).await {
            Ok(summary) => {
                tracing::info!(
                    indexed = summary.indexed,
                    failed = summary.failures.len(),
                    deleted = summary.deleted,
                    unchanged = summary.unchanged,
                    "scheduled ingest pass finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "scheduled ingest pass failed");
            }
        }
        drop(permit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_while_permit_held() {
        let guard = BatchGuard::new();
        let permit = guard.try_begin().expect("first claim");
        assert!(guard.try_begin().is_none());
        assert!(guard.is_active());
        drop(permit);
    }

    #[test]
    fn dropping_permit_releases_the_guard() {
        let guard = BatchGuard::new();
        drop(guard.try_begin().unwrap());
        assert!(!guard.is_active());
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn guard_is_reusable_across_many_batches() {
        let guard = BatchGuard::new();
        for _ in 0..3 {
            let permit = guard.try_begin().unwrap();
            drop(permit);
        }
    }
}
