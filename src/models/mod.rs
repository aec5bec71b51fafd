// src/models/mod.rs

//! Domain models for the refresher.
//!
//! This module contains the configuration tree and the records that flow
//! between the candidate stream, the fetch client and the write-back step.

mod config;
mod record;

// Re-export all public types
pub use config::{Config, CrawlerConfig, ID_PLACEHOLDER, RefreshConfig, StoreConfig};
pub use record::{
    CandidateRecord, Metrics, RecordId, RefreshWindow, TIMESTAMP_FORMAT, WriteBackPayload,
    format_timestamp, parse_timestamp,
};
