//! Service layer for the refresher.
//!
//! This module contains the upstream side of a refresh run:
//! - Metrics fetching (`ClipMetricsClient`, behind `MetricsSource`)
//! - Request pacing (`Pacer`)

mod metrics;
mod pacing;

pub use metrics::{ClipMetricsClient, FetchOutcome, MetricsSource, parse_metrics};
pub use pacing::Pacer;
