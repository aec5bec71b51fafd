// src/pipeline/refresh.rs

//! One refresh run: categories → candidates → worker pool.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{CandidateStream, DispatchSummary, RetryPolicy, WorkerPool, WriteBackApplier};
use crate::services::MetricsSource;
use crate::storage::{CandidateStore, CategoryLookup, RecordWriter};

/// Collaborators of a run, constructed once and shared by every worker.
#[derive(Clone)]
pub struct RefreshDeps {
    pub categories: Arc<dyn CategoryLookup>,
    pub candidates: Arc<dyn CandidateStore>,
    pub writer: Arc<dyn RecordWriter>,
    pub source: Arc<dyn MetricsSource>,
}

impl RefreshDeps {
    /// Use one store for every storage role.
    pub fn from_store<T>(store: Arc<T>, source: Arc<dyn MetricsSource>) -> Self
    where
        T: CategoryLookup + CandidateStore + RecordWriter + 'static,
    {
        Self {
            categories: store.clone(),
            candidates: store.clone(),
            writer: store,
            source,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// The parent tag has no child categories; nothing to do
    NoCategories,
    /// Candidates were paged and dispatched
    Completed(DispatchSummary),
}

impl RunReport {
    /// Number of records handed to the pool.
    pub fn queued(&self) -> usize {
        match self {
            Self::NoCategories => 0,
            Self::Completed(summary) => summary.queued,
        }
    }
}

/// Run one refresh pass.
///
/// Errors are returned only for setup failures before the pool starts.
pub async fn run_refresh(config: &Config, deps: RefreshDeps) -> Result<RunReport> {
    let started = Instant::now();
    log::info!(
        "[refresh] starting: window {}d, refresh {}h, {} workers",
        config.refresh.window_days,
        config.refresh.refresh_hours,
        config.crawler.workers
    );

    let Some(stream) = candidate_stream(config, &deps).await? else {
        return Ok(RunReport::NoCategories);
    };

    let applier = WriteBackApplier::new(deps.writer, config.store.target_tables.clone());
    let pool = WorkerPool::new(
        deps.source,
        Arc::new(applier),
        config.crawler.workers,
        RetryPolicy::from_config(&config.crawler),
    );

    let summary = pool.run(stream.prefetch().await).await;

    log::info!("[refresh] queued {} records", summary.queued);
    log::info!(
        "[refresh] refreshed {}, skipped {}, failed {} in {:.1}s{}",
        summary.refreshed,
        summary.skipped,
        summary.failed,
        started.elapsed().as_secs_f64(),
        if summary.interrupted {
            " (paging interrupted)"
        } else {
            ""
        }
    );

    Ok(RunReport::Completed(summary))
}

/// Count candidates without fetching or writing anything.
pub async fn dry_run(config: &Config, deps: &RefreshDeps) -> Result<Option<usize>> {
    let Some(stream) = candidate_stream(config, deps).await? else {
        return Ok(None);
    };

    let records = stream.collect_all().await?;
    for record in records.iter().take(10) {
        log::info!("[dry-run] {} created {:?}", record.id, record.created_at);
    }
    log::info!("[dry-run] {} records would be queued", records.len());
    Ok(Some(records.len()))
}

/// Resolve categories and build the candidate stream, or `None` if there are none.
async fn candidate_stream(config: &Config, deps: &RefreshDeps) -> Result<Option<CandidateStream>> {
    let parent_tag = &config.store.parent_tag;
    let category_ids = deps
        .categories
        .list_categories(parent_tag)
        .await
        .inspect_err(|e| log::error!("[refresh] category lookup failed: {}", e))?;

    if category_ids.is_empty() {
        log::warn!("[refresh] no child categories under '{}', nothing to do", parent_tag);
        return Ok(None);
    }
    log::debug!("[refresh] {} categories under '{}'", category_ids.len(), parent_tag);

    let stream = CandidateStream::for_run(
        deps.candidates.clone(),
        category_ids,
        &config.store.order_key,
        &config.refresh,
        Utc::now(),
    )?;
    let window = stream.window();
    log::debug!(
        "[refresh] created after {}, refreshed before {}",
        window.window_start,
        window.refresh_cutoff
    );
    Ok(Some(stream))
}
