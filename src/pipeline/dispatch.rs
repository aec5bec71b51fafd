// src/pipeline/dispatch.rs

//! Bounded worker pool running fetch + write-back per candidate.
//!
//! Every item runs on its own tokio task; at most `workers` are in flight
//! and the candidate stream is only polled when a slot is free. Item
//! failures, including panics, are logged and counted, never propagated.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{Stream, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, CrawlerConfig, Metrics, RecordId};
use crate::pipeline::WriteBackApplier;
use crate::services::{FetchOutcome, MetricsSource};

/// Counters for one pass over the candidate stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Records handed to the pool
    pub queued: usize,
    /// Records written back to every table
    pub refreshed: usize,
    /// Records whose response carried no metrics
    pub skipped: usize,
    /// Records that failed to fetch or write
    pub failed: usize,
    /// Paging stopped early because the store returned an error
    pub interrupted: bool,
}

/// How one record ended.
#[derive(Debug)]
pub enum ItemOutcome {
    Refreshed(Metrics),
    NoData,
    Failed(AppError),
}

/// Retry behaviour for transient fetch failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the first retry, doubled for each further one
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            attempts: config.fetch_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay_before(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Everything one item task needs; cloned into each task.
#[derive(Clone)]
struct ItemTask {
    source: Arc<dyn MetricsSource>,
    applier: Arc<WriteBackApplier>,
    retry: RetryPolicy,
}

impl ItemTask {
    async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome> {
        let mut attempt = 1;
        loop {
            match self.source.fetch(id).await {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_before(attempt);
                    log::debug!(
                        "[retry] {} attempt {}/{} failed: {}; waiting {:?}",
                        id,
                        attempt,
                        self.retry.attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn run(self, id: RecordId) -> ItemOutcome {
        let metrics = match self.fetch(&id).await {
            Ok(FetchOutcome::Metrics(metrics)) => metrics,
            Ok(FetchOutcome::NoData) => return ItemOutcome::NoData,
            Err(e) => return ItemOutcome::Failed(e),
        };

        match self.applier.apply(&id, metrics).await {
            Ok(_) => ItemOutcome::Refreshed(metrics),
            Err(e) => ItemOutcome::Failed(e),
        }
    }
}

/// What the pool sees for each stream element.
enum Event {
    Item(RecordId, ItemOutcome),
    StreamFailed(AppError),
}

/// Fixed-size pool of item workers.
pub struct WorkerPool {
    task: ItemTask,
    workers: usize,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        applier: Arc<WriteBackApplier>,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task: ItemTask {
                source,
                applier,
                retry,
            },
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatch every candidate in stream order and wait for all of them.
    pub async fn run<S>(&self, candidates: S) -> DispatchSummary
    where
        S: Stream<Item = Result<CandidateRecord>> + Send,
    {
        let mut summary = DispatchSummary::default();

        // Stop pulling after the first store error; it is still delivered.
        let candidates = candidates.scan(false, |failed, item| {
            let next = if *failed {
                None
            } else {
                *failed = item.is_err();
                Some(item)
            };
            futures::future::ready(next)
        });

        let events = candidates
            .map(|item| {
                let task = self.task.clone();
                async move {
                    let record = match item {
                        Ok(record) => record,
                        Err(e) => return Event::StreamFailed(e),
                    };
                    let id = record.id;
                    let handle = tokio::spawn(task.run(id.clone()));
                    let outcome = handle
                        .await
                        .unwrap_or_else(|join| ItemOutcome::Failed(AppError::task(join)));
                    Event::Item(id, outcome)
                }
            })
            .buffer_unordered(self.workers);
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                Event::Item(id, outcome) => {
                    summary.queued += 1;
                    match outcome {
                        ItemOutcome::Refreshed(metrics) => {
                            summary.refreshed += 1;
                            log::info!("[ok]   {} views→{}", id, metrics.view_count);
                        }
                        ItemOutcome::NoData => {
                            summary.skipped += 1;
                            log::info!("[skip] {} no metrics", id);
                        }
                        ItemOutcome::Failed(e) => {
                            summary.failed += 1;
                            log::warn!("[fail] {} {}", id, e);
                        }
                    }
                }
                Event::StreamFailed(e) => {
                    summary.interrupted = true;
                    log::error!("Candidate paging failed, draining in-flight work: {}", e);
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream;

    use super::*;
    use crate::models::RefreshConfig;
    use crate::pipeline::CandidateStream;
    use crate::storage::{MemoryStore, StoredRow};

    const TABLES: [&str; 2] = ["clips", "clips_recent"];

    #[derive(Clone, Copy)]
    enum Scripted {
        Ok(u64, u64),
        NoData,
        Status(u16),
        Panic,
    }

    /// Answers from a fixed script and tracks concurrency.
    struct ScriptedSource {
        script: HashMap<String, Vec<Scripted>>,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        hold: Duration,
    }

    impl ScriptedSource {
        fn new(script: &[(&str, Vec<Scripted>)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(id, steps)| (id.to_string(), steps.clone()))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                hold: Duration::ZERO,
            }
        }

        fn calls(&self, id: &str) -> usize {
            self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedSource {
        async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(id.to_string()).or_default();
                *n += 1;
                *n
            };
            let steps = &self.script[id.as_str()];
            match steps[(call - 1).min(steps.len() - 1)] {
                Scripted::Ok(view_count, likes_count) => Ok(FetchOutcome::Metrics(Metrics {
                    view_count,
                    likes_count,
                })),
                Scripted::NoData => Ok(FetchOutcome::NoData),
                Scripted::Status(status) => Err(AppError::UpstreamStatus {
                    id: id.to_string(),
                    status,
                }),
                Scripted::Panic => panic!("scripted panic for {id}"),
            }
        }
    }

    fn store_with(ids: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new("clips_recent"));
        for id in ids {
            store.insert_all(&TABLES, StoredRow::new(*id, "irl-1", Utc::now()));
        }
        store
    }

    fn pool(source: Arc<ScriptedSource>, store: Arc<MemoryStore>, workers: usize, retry: RetryPolicy) -> WorkerPool {
        let applier = WriteBackApplier::new(store, TABLES.iter().map(|t| t.to_string()).collect());
        WorkerPool::new(source, Arc::new(applier), workers, retry)
    }

    fn candidates(ids: &[&str]) -> impl Stream<Item = Result<CandidateRecord>> + Send + 'static {
        let records: Vec<Result<CandidateRecord>> = ids
            .iter()
            .map(|id| {
                Ok(CandidateRecord {
                    id: RecordId::from(*id),
                    created_at: None,
                    last_refresh: None,
                })
            })
            .collect();
        stream::iter(records)
    }

    #[tokio::test]
    async fn failures_do_not_affect_siblings() {
        let source = Arc::new(ScriptedSource::new(&[
            ("a", vec![Scripted::Ok(1, 1)]),
            ("b", vec![Scripted::Status(500)]),
            ("c", vec![Scripted::Ok(3, 3)]),
            ("d", vec![Scripted::Panic]),
            ("e", vec![Scripted::NoData]),
        ]));
        let store = store_with(&["a", "b", "c", "d", "e"]);
        let pool = pool(source, store.clone(), 3, RetryPolicy::none());

        let summary = pool.run(candidates(&["a", "b", "c", "d", "e"])).await;

        assert_eq!(
            summary,
            DispatchSummary {
                queued: 5,
                refreshed: 2,
                skipped: 1,
                failed: 2,
                interrupted: false,
            }
        );
        for table in TABLES {
            assert_eq!(store.get(table, &"a".into()).unwrap().view_count, 1);
            assert_eq!(store.get(table, &"c".into()).unwrap().view_count, 3);
            assert!(store.get(table, &"b".into()).unwrap().last_view_refresh.is_none());
            assert!(store.get(table, &"e".into()).unwrap().last_view_refresh.is_none());
        }
    }

    #[tokio::test]
    async fn never_exceeds_worker_count() {
        let ids: Vec<String> = (0..12).map(|i| format!("r{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let script: Vec<(&str, Vec<Scripted>)> =
            refs.iter().map(|id| (*id, vec![Scripted::Ok(1, 0)])).collect();

        let mut source = ScriptedSource::new(&script);
        source.hold = Duration::from_millis(20);
        let source = Arc::new(source);
        let pool = pool(source.clone(), store_with(&refs), 3, RetryPolicy::none());

        let summary = pool.run(candidates(&refs)).await;

        assert_eq!(summary.queued, 12);
        assert_eq!(summary.refreshed, 12);
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
        assert!(source.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_when_enabled() {
        let source = Arc::new(ScriptedSource::new(&[
            ("flaky", vec![Scripted::Status(503), Scripted::Ok(7, 1)]),
            ("gone", vec![Scripted::Status(404), Scripted::Ok(1, 1)]),
        ]));
        let retry = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let pool = pool(source.clone(), store_with(&["flaky", "gone"]), 2, retry);

        let summary = pool.run(candidates(&["flaky", "gone"])).await;

        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(source.calls("flaky"), 2);
        assert_eq!(source.calls("gone"), 1);
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let source = Arc::new(ScriptedSource::new(&[(
            "flaky",
            vec![Scripted::Status(503), Scripted::Ok(7, 1)],
        )]));
        let pool = pool(source.clone(), store_with(&["flaky"]), 1, RetryPolicy::none());

        let summary = pool.run(candidates(&["flaky"])).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(source.calls("flaky"), 1);
    }

    #[tokio::test]
    async fn stream_error_stops_dispatch_and_drains() {
        let source = Arc::new(ScriptedSource::new(&[
            ("a", vec![Scripted::Ok(1, 1)]),
            ("z", vec![Scripted::Ok(1, 1)]),
        ]));
        let pool = pool(source.clone(), store_with(&["a", "z"]), 2, RetryPolicy::none());

        let items: Vec<Result<CandidateRecord>> = vec![
            Ok(CandidateRecord {
                id: "a".into(),
                created_at: None,
                last_refresh: None,
            }),
            Err(AppError::store("candidate page", "timeout")),
            Ok(CandidateRecord {
                id: "z".into(),
                created_at: None,
                last_refresh: None,
            }),
        ];
        let summary = pool.run(stream::iter(items)).await;

        assert!(summary.interrupted);
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(source.calls("z"), 0);
    }

    #[tokio::test]
    async fn runs_directly_over_paged_candidates() {
        let source = Arc::new(ScriptedSource::new(&[
            ("a", vec![Scripted::Ok(1, 1)]),
            ("b", vec![Scripted::NoData]),
        ]));
        let store = store_with(&["a", "b"]);
        store.add_category("irl-1", "irl");
        let stream = CandidateStream::for_run(
            store.clone(),
            vec!["irl-1".into()],
            "created_at",
            &RefreshConfig::default(),
            Utc::now(),
        )
        .unwrap();
        let pool = pool(source, store, 2, RetryPolicy::none());

        let summary = pool.run(stream.into_stream()).await;

        assert_eq!(summary.queued, 2);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 4,
            backoff: Duration::from_millis(1000),
        };
        assert_eq!(retry.delay_before(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_before(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_before(3), Duration::from_millis(4000));
    }
}
