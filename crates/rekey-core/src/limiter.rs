//! Bounded-parallelism executor
//!
//! Caps how many store operations may be outstanding at once. Every phase
//! of a migration fans out through one [`ConcurrencyLimiter`] value owned by
//! the orchestrator, so independent migrations never share admission state.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Admission control for concurrent tasks
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl ConcurrencyLimiter {
    /// Default in-flight ceiling
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

    /// Create a limiter admitting at most `max_in_flight` tasks (minimum 1)
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Configured ceiling
    #[inline]
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Tasks currently holding a slot
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Run `task` once a slot is free
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquisition can only wait.
        let _permit = self.permits.acquire().await;
        task.await
    }

    /// Run every task under the ceiling and wait for all of them
    ///
    /// Results come back in input order. A failing task does not cancel its
    /// siblings.
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        join_all(tasks.into_iter().map(|task| self.schedule(task))).await
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn zero_ceiling_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).max_in_flight(), 1);
        assert_eq!(ConcurrencyLimiter::default().max_in_flight(), 1000);
    }

    #[tokio::test]
    async fn never_exceeds_ceiling() {
        let limiter = ConcurrencyLimiter::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                i
            }
        });

        let results = limiter.run_all(tasks).await;
        assert_eq!(results, (0..10).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let limiter = ConcurrencyLimiter::new(3);
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6).map(|i| {
            let completed = Arc::clone(&completed);
            async move {
                tokio::task::yield_now().await;
                completed.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    Err(i)
                } else {
                    Ok(i)
                }
            }
        });

        let results = limiter.run_all(tasks).await;
        assert_eq!(completed.load(Ordering::SeqCst), 6);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 3);
    }

    #[tokio::test]
    async fn slots_are_shared_across_phases_of_one_instance() {
        let limiter = ConcurrencyLimiter::new(1);
        let clone = limiter.clone();

        let holder = limiter.schedule(async {
            assert_eq!(clone.in_flight(), 1);
        });
        holder.await;
        assert_eq!(limiter.in_flight(), 0);
    }
}
