//! Supabase/PostgREST storage implementation.
//!
//! Reads categories and candidate pages with filtered `GET` requests and
//! writes metrics with `PATCH ?id=eq.{id}`, which only touches matching
//! rows and is therefore safe to repeat.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, RecordId, StoreConfig, WriteBackPayload, format_timestamp};
use crate::storage::{CandidateQuery, CandidateStore, CategoryLookup, RecordWriter};
use crate::utils::truncate_body;

/// Columns read for each candidate row.
const CANDIDATE_COLUMNS: &str = "id,created_at,last_view_refresh";
const CATEGORY_COLUMN: &str = "category_id";
const CREATED_COLUMN: &str = "created_at";
const REFRESH_COLUMN: &str = "last_view_refresh";

/// Longest response body kept in an error message.
const ERROR_BODY_CHARS: usize = 300;

/// PostgREST-backed store.
#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    rest_base: Url,
    service_key: String,
    category_table: String,
    parent_column: String,
    candidate_table: String,
}

#[derive(Deserialize)]
struct CategoryRow {
    id: RecordId,
}

impl PostgrestStore {
    /// Create a store client from configuration.
    ///
    /// `config.url` is the project URL; requests go to `{url}/rest/v1/`.
    pub fn new(client: Client, config: &StoreConfig) -> Result<Self> {
        let service_key = config
            .service_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::config("store service key is not set"))?;

        let mut base = Url::parse(&config.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest_base = base.join("rest/v1/")?;

        Ok(Self {
            client,
            rest_base,
            service_key,
            category_table: config.category_table.clone(),
            parent_column: config.parent_column.clone(),
            candidate_table: config.candidate_table.clone(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        Ok(self.rest_base.join(table)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Query parameters selecting one page of candidates.
    pub fn candidate_params(query: &CandidateQuery, offset: usize) -> Vec<(String, String)> {
        let created_after = format_timestamp(query.window.window_start);
        let stale_before = format_timestamp(query.window.refresh_cutoff);

        vec![
            ("select".into(), CANDIDATE_COLUMNS.into()),
            (
                CATEGORY_COLUMN.into(),
                format!("in.({})", in_list(&query.category_ids)),
            ),
            (CREATED_COLUMN.into(), format!("gte.{created_after}")),
            (
                "or".into(),
                format!("({REFRESH_COLUMN}.is.null,{REFRESH_COLUMN}.lt.{stale_before})"),
            ),
            ("order".into(), format!("{}.asc,id.asc", query.order_key)),
            ("limit".into(), query.limit.to_string()),
            ("offset".into(), offset.to_string()),
        ]
    }

    async fn check(context: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::StoreStatus {
            context: context.to_string(),
            status: status.as_u16(),
            body: truncate_body(&body, ERROR_BODY_CHARS),
        })
    }
}

/// Render values for an `in.(...)` filter, each double-quoted so that
/// commas and parentheses inside a value are not read as syntax.
fn in_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl CategoryLookup for PostgrestStore {
    async fn list_categories(&self, parent_tag: &str) -> Result<Vec<String>> {
        let url = self.table_url(&self.category_table)?;
        let request = self.client.get(url).query(&[
            ("select", "id".to_string()),
            (self.parent_column.as_str(), format!("eq.{parent_tag}")),
        ]);

        let response = self.authorized(request).send().await?;
        let rows: Vec<CategoryRow> = Self::check("category lookup", response)
            .await?
            .json()
            .await?;

        Ok(rows.into_iter().map(|row| row.id.as_str().to_string()).collect())
    }
}

#[async_trait]
impl CandidateStore for PostgrestStore {
    async fn page(&self, query: &CandidateQuery, offset: usize) -> Result<Vec<CandidateRecord>> {
        if query.category_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.table_url(&self.candidate_table)?;
        let request = self
            .client
            .get(url)
            .query(&Self::candidate_params(query, offset));

        let response = self.authorized(request).send().await?;
        let rows = Self::check("candidate page", response)
            .await?
            .json()
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RecordWriter for PostgrestStore {
    async fn update(&self, table: &str, id: &RecordId, payload: &WriteBackPayload) -> Result<()> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .patch(url)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(payload);

        let response = self.authorized(request).send().await?;
        Self::check(&format!("update of {table}"), response).await?;
        Ok(())
    }
}
