// src/pipeline/candidates.rs

//! Offset-paged stream of refresh candidates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, RefreshConfig, RefreshWindow};
use crate::storage::{CandidateQuery, CandidateStore};

/// Lazy, finite sequence of candidates for one run.
///
/// The window is fixed when the stream is created. The cursor lives only
/// in memory; a new run starts again from offset zero.
pub struct CandidateStream {
    store: Arc<dyn CandidateStore>,
    query: CandidateQuery,
}

impl CandidateStream {
    pub fn new(store: Arc<dyn CandidateStore>, query: CandidateQuery) -> Self {
        Self { store, query }
    }

    /// Build the query for a run starting at `now`.
    pub fn for_run(
        store: Arc<dyn CandidateStore>,
        category_ids: Vec<String>,
        order_key: &str,
        config: &RefreshConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let query = CandidateQuery {
            category_ids,
            window: RefreshWindow::at(now, config.window_days, config.refresh_hours)?,
            order_key: order_key.to_string(),
            limit: config.page_size.max(1),
        };
        Ok(Self::new(store, query))
    }

    pub fn window(&self) -> RefreshWindow {
        self.query.window
    }

    /// Page through the store until the first empty page.
    ///
    /// A store error is yielded once and ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<CandidateRecord>> + Send + 'static {
        let Self { store, query } = self;
        let page_size = query.limit;

        stream::try_unfold(0usize, move |offset| {
            let store = Arc::clone(&store);
            let query = query.clone();
            async move {
                let rows = store.page(&query, offset).await?;
                if rows.is_empty() {
                    log::debug!("Candidate paging exhausted at offset {}", offset);
                    return Ok::<_, AppError>(None);
                }
                log::debug!("Fetched {} candidates at offset {}", rows.len(), offset);
                Ok::<_, AppError>(Some((rows, offset + page_size)))
            }
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<_, AppError>)))
        .try_flatten()
    }

    /// Page to exhaustion, then replay the candidates as a stream.
    ///
    /// Writing a record back removes it from the staleness filter, which
    /// shifts every later offset. Paging therefore has to finish before
    /// the first write lands. A paging error is kept as the last item.
    pub async fn prefetch(self) -> impl Stream<Item = Result<CandidateRecord>> + Send + 'static {
        let items: Vec<Result<CandidateRecord>> = self.into_stream().collect().await;
        log::debug!("Prefetched {} candidate items", items.len());
        stream::iter(items)
    }

    /// Drain the stream into a list without dispatching anything.
    pub async fn collect_all(self) -> Result<Vec<CandidateRecord>> {
        self.into_stream().try_collect().await
    }
}
