// src/pipeline/writeback.rs

//! Persists refreshed metrics to every target table.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::models::{Metrics, RecordId, WriteBackPayload};
use crate::storage::RecordWriter;

/// Applies one payload to the canonical table and its replicas.
///
/// Tables are written in order and the first failure stops the sequence.
/// The candidate table should come last so that a partial write leaves the
/// record stale and it is picked up again on the next run.
pub struct WriteBackApplier {
    writer: Arc<dyn RecordWriter>,
    tables: Vec<String>,
}

impl WriteBackApplier {
    pub fn new(writer: Arc<dyn RecordWriter>, tables: Vec<String>) -> Self {
        Self { writer, tables }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Stamp `metrics` with the current time and write it everywhere.
    pub async fn apply(&self, id: &RecordId, metrics: Metrics) -> Result<WriteBackPayload> {
        let payload = WriteBackPayload::new(metrics, Utc::now());
        self.apply_payload(id, &payload).await?;
        Ok(payload)
    }

    /// Write a prepared payload to every table.
    pub async fn apply_payload(&self, id: &RecordId, payload: &WriteBackPayload) -> Result<()> {
        for table in &self.tables {
            self.writer.update(table, id, payload).await?;
        }
        Ok(())
    }
}
