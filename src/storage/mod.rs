//! Storage abstractions for candidate selection and write-back.
//!
//! The refresher talks to the store through three narrow traits:
//!
//! - [`CategoryLookup`]: child categories under a parent tag
//! - [`CandidateStore`]: one page of stale, in-window records
//! - [`RecordWriter`]: idempotent update of one record in one table
//!
//! [`PostgrestStore`] implements all three against a Supabase/PostgREST
//! project; [`MemoryStore`] implements them in-process.

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CandidateRecord, RecordId, RefreshWindow, WriteBackPayload};

// Re-export for convenience
pub use memory::{MemoryStore, StoredRow};
pub use postgrest::PostgrestStore;

/// Filter and ordering shared by every page of one run.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// Only records in these categories are selected
    pub category_ids: Vec<String>,
    /// Creation and staleness bounds
    pub window: RefreshWindow,
    /// Column pages are ordered by, ascending, with `id` as tie-breaker
    pub order_key: String,
    /// Rows per page
    pub limit: usize,
}

/// Lookup of the categories a run covers.
#[async_trait]
pub trait CategoryLookup: Send + Sync {
    /// Return child category ids under `parent_tag`. An empty list is valid.
    async fn list_categories(&self, parent_tag: &str) -> Result<Vec<String>>;
}

/// Paged read access to candidate records.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Return up to `query.limit` matching records starting at `offset`.
    ///
    /// An empty page means the result set is exhausted.
    async fn page(&self, query: &CandidateQuery, offset: usize) -> Result<Vec<CandidateRecord>>;
}

/// Write access for refreshed metrics.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Apply `payload` to the row of `table` whose id is `id`.
    ///
    /// Must be idempotent; updating an id with no matching row succeeds.
    async fn update(&self, table: &str, id: &RecordId, payload: &WriteBackPayload) -> Result<()>;
}
