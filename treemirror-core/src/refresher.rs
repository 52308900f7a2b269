//! Bulk content refresh with bounded concurrency and per-item progress

use crate::cache::{ContentFetcher, ContentResolver};
use crate::config::Config;
use crate::item::Item;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Receives `(processed, total)` after every completed item
pub trait ProgressReporter {
    fn report(&mut self, processed: usize, total: usize);
}

impl<T: FnMut(usize, usize)> ProgressReporter for T {
    fn report(&mut self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// Progress sink that ignores every update
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _processed: usize, _total: usize) {}
}

/// Aggregate outcome of a bulk refresh
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    /// Content per item id; failed items carry empty content
    #[serde(skip)]
    pub contents: Vec<(String, String)>,
}

/// Drives the resolver over many items, a fixed-size batch at a time.
#[derive(Debug, Clone)]
pub struct BatchRefresher {
    concurrency: usize,
    pause: Duration,
}

impl Default for BatchRefresher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONCURRENCY, Duration::from_millis(250))
    }
}

impl BatchRefresher {
    pub const DEFAULT_CONCURRENCY: usize = 5;

    pub fn new(concurrency: usize, pause: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            pause,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.concurrency(), config.batch_pause())
    }

    /// Resolve content for every item. One failing item never aborts the run;
    /// failures are counted, logged per batch, and returned in the report.
    pub async fn refresh_all<F: ContentFetcher>(
        &self,
        resolver: &Arc<ContentResolver<F>>,
        items: &[Item],
        progress: &mut impl ProgressReporter,
    ) -> BatchReport {
        let total = items.len();
        let mut report = BatchReport {
            total,
            ..Default::default()
        };
        let mut processed = 0usize;
        let batches = items.chunks(self.concurrency);
        let batch_count = batches.len();

        for (batch_idx, batch) in batches.enumerate() {
            let mut tasks = JoinSet::new();
            let mut pending: HashSet<String> = HashSet::with_capacity(batch.len());

            for item in batch {
                let resolver = Arc::clone(resolver);
                let item = item.clone();
                pending.insert(item.id.clone());
                tasks.spawn(async move {
                    let result = resolver.resolve_item(&item).await;
                    (item.id, result)
                });
            }

            let mut batch_failures = 0usize;
            while let Some(joined) = tasks.join_next().await {
                let (id, result) = match joined {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        // Task ids are not exposed; settled below from `pending`
                        tracing::warn!(error = %join_err, "content task aborted");
                        continue;
                    }
                };
                pending.remove(&id);
                match result {
                    Ok(content) => {
                        report.succeeded += 1;
                        report.contents.push((id, content));
                    }
                    Err(_) => {
                        batch_failures += 1;
                        report.failed_ids.push(id.clone());
                        report.contents.push((id, String::new()));
                    }
                }
                processed += 1;
                progress.report(processed, total);
            }

            // Aborted tasks never reported back
            for id in pending {
                batch_failures += 1;
                report.failed_ids.push(id.clone());
                report.contents.push((id, String::new()));
                processed += 1;
                progress.report(processed, total);
            }
            report.failed += batch_failures;

            if batch_failures > 0 {
                tracing::warn!(
                    batch = batch_idx + 1,
                    failed = batch_failures,
                    "content fetch failures in batch"
                );
            }

            if batch_idx + 1 < batch_count && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        tracing::info!(
            total,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk content refresh finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::resolver::tests::CountingFetcher;
    use crate::cache::PersistentCache;
    use crate::error::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| {
                Item::new(
                    format!("i{i}"),
                    format!("Item {i}"),
                    datetime!(2024-05-01 0:00 UTC),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn progress_fires_per_item_and_failures_are_isolated() {
        let fetcher = CountingFetcher::default();
        for i in 0..7 {
            fetcher.set(&format!("i{i}"), &format!("body {i}"));
        }
        fetcher.fail("i3");
        let resolver = Arc::new(ContentResolver::new(
            PersistentCache::open_in_memory().unwrap(),
            fetcher,
        ));

        let mut seen = Vec::new();
        let mut progress = |processed: usize, total: usize| seen.push((processed, total));
        let report = BatchRefresher::new(3, Duration::ZERO)
            .refresh_all(&resolver, &items(7), &mut progress)
            .await;

        assert_eq!(report.total, 7);
        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_ids, vec!["i3".to_string()]);
        assert_eq!(report.contents.len(), 7);
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&(7, 7)));
        assert!(seen.windows(2).all(|w| w[0].0 + 1 == w[1].0));
    }

    struct ProbeFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ContentFetcher for ProbeFetcher {
        async fn fetch(&self, id: &str) -> Result<String, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("content of {id}"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded() {
        let resolver = Arc::new(ContentResolver::new(
            PersistentCache::open_in_memory().unwrap(),
            ProbeFetcher {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
        ));

        let report = BatchRefresher::new(2, Duration::from_millis(1))
            .refresh_all(&resolver, &items(9), &mut NoProgress)
            .await;

        assert_eq!(report.succeeded, 9);
        assert!(resolver.fetcher().peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cached_items_are_not_fetched_again() {
        let fetcher = CountingFetcher::with(&[("i0", "zero"), ("i1", "one")]);
        let resolver = Arc::new(ContentResolver::new(
            PersistentCache::open_in_memory().unwrap(),
            fetcher,
        ));
        let refresher = BatchRefresher::new(5, Duration::ZERO);
        refresher.refresh_all(&resolver, &items(2), &mut NoProgress).await;
        refresher.refresh_all(&resolver, &items(2), &mut NoProgress).await;

        assert_eq!(resolver.fetcher().calls.load(Ordering::SeqCst), 2);
    }
}
