// src/services/metrics.rs

//! Upstream clip metrics client.
//!
//! Maps one record id to its current counters. Every request is preceded
//! by the [`Pacer`] delay; retries are left to the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, ID_PLACEHOLDER, Metrics, RecordId};
use crate::services::Pacer;

/// Key under which the endpoint may nest the clip object.
const NESTED_KEY: &str = "clip";

/// Result of a successful upstream exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Metrics(Metrics),
    /// Response was well-formed but lacked the expected counters
    NoData,
}

/// Source of fresh metrics for one record.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome>;
}

/// Rate-limited HTTP client for the clip endpoint.
pub struct ClipMetricsClient {
    client: Client,
    endpoint: String,
    pacer: Pacer,
}

impl ClipMetricsClient {
    pub fn new(client: Client, endpoint: impl Into<String>, pacer: Pacer) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            pacer,
        }
    }

    pub fn from_config(client: Client, config: &CrawlerConfig) -> Self {
        Self::new(client, config.endpoint.clone(), Pacer::from_config(config))
    }

    /// Endpoint URL for one record.
    pub fn url_for(&self, id: &RecordId) -> String {
        self.endpoint.replace(ID_PLACEHOLDER, id.as_str())
    }
}

#[async_trait]
impl MetricsSource for ClipMetricsClient {
    async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome> {
        self.pacer.wait().await;

        let response = self.client.get(self.url_for(id)).send().await?;
        if response.status() != StatusCode::OK {
            return Err(AppError::UpstreamStatus {
                id: id.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await?;
        Ok(parse_metrics(&body))
    }
}

/// Extract counters from an endpoint response.
///
/// Uses the nested `clip` object when present, otherwise the top level.
/// Missing, negative or non-integer counters yield [`FetchOutcome::NoData`].
pub fn parse_metrics(body: &Value) -> FetchOutcome {
    let clip = match body.get(NESTED_KEY) {
        Some(nested) if nested.is_object() => nested,
        _ => body,
    };

    let counter = |key: &str| clip.get(key).and_then(Value::as_u64);
    match (counter("view_count"), counter("likes_count")) {
        (Some(view_count), Some(likes_count)) => FetchOutcome::Metrics(Metrics {
            view_count,
            likes_count,
        }),
        _ => FetchOutcome::NoData,
    }
}
