//! In-process storage implementation.
//!
//! Mirrors the filter, ordering and offset semantics of the PostgREST
//! backend so the pipeline can be exercised without a live project.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, RecordId, WriteBackPayload, parse_timestamp};
use crate::storage::{CandidateQuery, CandidateStore, CategoryLookup, RecordWriter};

/// One row of a clip table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: RecordId,
    pub category_id: String,
    pub created_at: DateTime<Utc>,
    pub last_view_refresh: Option<DateTime<Utc>>,
    pub view_count: u64,
    pub likes_count: u64,
    pub score: u64,
}

impl StoredRow {
    pub fn new(id: impl Into<RecordId>, category_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            category_id: category_id.to_string(),
            created_at,
            last_view_refresh: None,
            view_count: 0,
            likes_count: 0,
            score: 0,
        }
    }

    pub fn refreshed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_view_refresh = Some(at);
        self
    }

    fn candidate(&self) -> CandidateRecord {
        CandidateRecord {
            id: self.id.clone(),
            created_at: Some(self.created_at),
            last_refresh: self.last_view_refresh,
        }
    }
}

#[derive(Default)]
struct Tables {
    categories: Vec<(String, String)>,
    rows: HashMap<String, BTreeMap<RecordId, StoredRow>>,
}

/// In-memory store with named tables.
pub struct MemoryStore {
    candidate_table: String,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store that pages candidates from `candidate_table`.
    pub fn new(candidate_table: impl Into<String>) -> Self {
        Self {
            candidate_table: candidate_table.into(),
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means another test thread panicked mid-insert.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a category under a parent tag.
    pub fn add_category(&self, id: &str, parent_tag: &str) {
        self.lock()
            .categories
            .push((id.to_string(), parent_tag.to_string()));
    }

    /// Insert or replace a row in `table`.
    pub fn insert(&self, table: &str, row: StoredRow) {
        self.lock()
            .rows
            .entry(table.to_string())
            .or_default()
            .insert(row.id.clone(), row);
    }

    /// Insert the same row into every listed table.
    pub fn insert_all(&self, tables: &[&str], row: StoredRow) {
        for table in tables {
            self.insert(table, row.clone());
        }
    }

    /// Fetch a copy of one row.
    pub fn get(&self, table: &str, id: &RecordId) -> Option<StoredRow> {
        self.lock().rows.get(table)?.get(id).cloned()
    }

    /// Copy of every row in `table`, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.lock()
            .rows
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CategoryLookup for MemoryStore {
    async fn list_categories(&self, parent_tag: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .categories
            .iter()
            .filter(|(_, parent)| parent == parent_tag)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn page(&self, query: &CandidateQuery, offset: usize) -> Result<Vec<CandidateRecord>> {
        let tables = self.lock();
        let Some(rows) = tables.rows.get(&self.candidate_table) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&StoredRow> = rows
            .values()
            .filter(|row| query.category_ids.contains(&row.category_id))
            .filter(|row| query.window.selects(row.created_at, row.last_view_refresh))
            .collect();

        // Only creation time is modelled as an ordering key here.
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(query.limit)
            .map(StoredRow::candidate)
            .collect())
    }
}

#[async_trait]
impl RecordWriter for MemoryStore {
    async fn update(&self, table: &str, id: &RecordId, payload: &WriteBackPayload) -> Result<()> {
        let refreshed = parse_timestamp(&payload.last_view_refresh).ok_or_else(|| {
            AppError::store(
                format!("update of {table}"),
                format!("invalid timestamp {}", payload.last_view_refresh),
            )
        })?;

        let mut tables = self.lock();
        if let Some(row) = tables.rows.get_mut(table).and_then(|rows| rows.get_mut(id)) {
            row.view_count = payload.view_count;
            row.likes_count = payload.likes_count;
            row.score = payload.score;
            row.last_view_refresh = Some(refreshed);
        }
        Ok(())
    }
}
