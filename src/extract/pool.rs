//! Bounded fan-out/fan-in over independent work items.

use super::{with_retry, FetchOutcome, RetryPolicy, SourceError};
use crate::metrics;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A worker pool parameterized by size, per-attempt timeout and retry policy.
///
/// Results are aggregated in completion order; a failing item never aborts
/// the others.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    size: usize,
    item_timeout: Option<Duration>,
    retry: RetryPolicy,
}

/// Fan-in of one [`WorkerPool::run`].
#[derive(Debug)]
pub struct PoolReport<I, T> {
    pub submitted: usize,
    pub found: Vec<(I, T)>,
    pub not_found: Vec<I>,
    pub failed: Vec<(I, SourceError)>,
    /// Set when the run stopped waiting because of a cancellation request.
    pub cancelled: bool,
}

impl<I, T> PoolReport<I, T> {
    fn new(submitted: usize) -> Self {
        Self {
            submitted,
            found: Vec::new(),
            not_found: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn completed(&self) -> usize {
        self.found.len() + self.not_found.len() + self.failed.len()
    }

    /// Items that produced no record, for whatever reason.
    pub fn skipped(&self) -> usize {
        self.not_found.len() + self.failed.len()
    }
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            size: size.max(1),
            item_timeout: None,
            retry,
        }
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    /// Fetches every item with at most `size` in flight, retrying transient
    /// failures per item. Returns early, with `cancelled` set, when `cancel`
    /// fires; in-flight fetches are dropped.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        fetch: F,
    ) -> PoolReport<I, T>
    where
        I: Clone + fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        let mut report = PoolReport::new(items.len());
        if items.is_empty() {
            return report;
        }
        debug!(
            "{}: dispatching {} items to {} workers",
            self.name,
            items.len(),
            self.size
        );

        let pool = self;
        let fetch = &fetch;
        let results = stream::iter(items)
            .map(move |item| async move {
                let outcome =
                    with_retry(&pool.retry, &pool.name, || pool.attempt(fetch(item.clone()))).await;
                (item, outcome)
            })
            .buffer_unordered(self.size);
        let mut results = std::pin::pin!(results);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        "{}: cancelled with {}/{} items completed",
                        self.name,
                        report.completed(),
                        report.submitted
                    );
                    report.cancelled = true;
                    break;
                }
                next = results.next() => match next {
                    Some((item, outcome)) => self.record(&mut report, item, outcome),
                    None => break,
                },
            }
        }

        info!(
            "{}: {} found, {} not found, {} failed of {}",
            self.name,
            report.found.len(),
            report.not_found.len(),
            report.failed.len(),
            report.submitted
        );
        report
    }

    async fn attempt<T>(&self, fut: impl Future<Output = FetchOutcome<T>>) -> FetchOutcome<T> {
        match self.item_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(outcome) => outcome,
                Err(_) => FetchOutcome::TransientFailure(SourceError::Timeout(limit)),
            },
            None => fut.await,
        }
    }

    fn record<I: fmt::Display, T>(
        &self,
        report: &mut PoolReport<I, T>,
        item: I,
        outcome: FetchOutcome<T>,
    ) {
        metrics::record_fetch(&self.name, outcome.label());
        match outcome {
            FetchOutcome::Found(value) => report.found.push((item, value)),
            FetchOutcome::NotFound => {
                debug!("{}: no data for {}", self.name, item);
                report.not_found.push(item);
            }
            FetchOutcome::TransientFailure(error) | FetchOutcome::PermanentFailure(error) => {
                warn!("{}: skipping {}: {}", self.name, item, error);
                report.failed.push((item, error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn partial_failures_are_isolated() {
        let pool = WorkerPool::new("test", 5, RetryPolicy::immediate(3));
        let items: Vec<u32> = (0..50).collect();
        let report = pool
            .run(items, &CancellationToken::new(), |i| async move {
                if i % 17 == 3 {
                    FetchOutcome::PermanentFailure(SourceError::Malformed(format!("item {}", i)))
                } else {
                    FetchOutcome::Found(i * 2)
                }
            })
            .await;

        assert_eq!(report.submitted, 50);
        assert_eq!(report.found.len(), 47);
        assert_eq!(report.failed.len(), 3);
        assert_eq!(report.skipped(), 3);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("test", 4, RetryPolicy::no_retry());

        let report = pool
            .run((0..20).collect::<Vec<u32>>(), &CancellationToken::new(), |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    FetchOutcome::Found(i)
                }
            })
            .await;

        assert_eq!(report.found.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_per_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("test", 2, RetryPolicy::immediate(3));
        let report = pool
            .run(vec!["a".to_string()], &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        FetchOutcome::TransientFailure(SourceError::Request("reset".into()))
                    } else {
                        FetchOutcome::Found(())
                    }
                }
            })
            .await;
        assert_eq!(report.found.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_items_time_out() {
        let pool = WorkerPool::new("test", 2, RetryPolicy::no_retry())
            .with_item_timeout(Duration::from_millis(10));
        let report = pool
            .run(vec![1u32, 2], &CancellationToken::new(), |i| async move {
                if i == 2 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                FetchOutcome::Found(i)
            })
            .await;
        assert_eq!(report.found.len(), 1);
        assert!(matches!(report.failed[0].1, SourceError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new("test", 2, RetryPolicy::no_retry());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = pool
            .run((0..10).collect::<Vec<u32>>(), &cancel, |i| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                FetchOutcome::Found(i)
            })
            .await;
        assert!(report.cancelled);
        assert_eq!(report.completed(), 0);
    }

    #[tokio::test]
    async fn not_found_is_not_a_failure() {
        let pool = WorkerPool::new("test", 2, RetryPolicy::immediate(3));
        let report: PoolReport<u32, u32> = pool
            .run(vec![1, 2], &CancellationToken::new(), |_| async { FetchOutcome::NotFound })
            .await;
        assert_eq!(report.not_found.len(), 2);
        assert!(report.failed.is_empty());
    }
}
