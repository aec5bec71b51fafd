//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Candidate selection settings
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Upstream HTTP and worker pool settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Store endpoint and table layout
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("SUPABASE_URL").or_else(|| var("NEXT_PUBLIC_SUPABASE_URL")) {
            self.store.url = url;
        }
        if let Some(key) = var("SUPA_SERVICE_KEY") {
            self.store.service_key = Some(key);
        }

        fn parsed<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(v) = value.and_then(|s| s.trim().parse().ok()) {
                *target = v;
            }
        }

        parsed(var("REFRESH_WORKERS"), &mut self.crawler.workers);
        parsed(var("REFRESH_WINDOW_DAYS"), &mut self.refresh.window_days);
        parsed(var("REFRESH_HOURS"), &mut self.refresh.refresh_hours);
        parsed(var("REFRESH_PAGE_SIZE"), &mut self.refresh.page_size);
        parsed(var("FETCH_TIMEOUT_SECS"), &mut self.crawler.timeout_secs);
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.refresh.window_days == 0 || self.refresh.window_days > MAX_WINDOW_DAYS {
            return Err(AppError::validation(format!(
                "refresh.window_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        if self.refresh.refresh_hours > MAX_REFRESH_HOURS {
            return Err(AppError::validation(format!(
                "refresh.refresh_hours must be at most {MAX_REFRESH_HOURS}"
            )));
        }
        if self.refresh.page_size == 0 {
            return Err(AppError::validation("refresh.page_size must be > 0"));
        }
        if self.crawler.workers == 0 {
            return Err(AppError::validation("crawler.workers must be > 0"));
        }
        if !(self.crawler.base_delay_secs.is_finite() && self.crawler.base_delay_secs > 0.0) {
            return Err(AppError::validation(
                "crawler.base_delay_secs must be > 0",
            ));
        }
        if !(self.crawler.jitter_secs.is_finite() && self.crawler.jitter_secs >= 0.0) {
            return Err(AppError::validation("crawler.jitter_secs must be >= 0"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.fetch_attempts == 0 {
            return Err(AppError::validation("crawler.fetch_attempts must be > 0"));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if !self.crawler.endpoint.contains(ID_PLACEHOLDER) {
            return Err(AppError::validation(format!(
                "crawler.endpoint must contain {ID_PLACEHOLDER}"
            )));
        }
        url::Url::parse(&self.crawler.endpoint.replace(ID_PLACEHOLDER, "0"))?;
        if self.store.target_tables.is_empty() {
            return Err(AppError::validation("store.target_tables is empty"));
        }
        if self.store.parent_tag.trim().is_empty() {
            return Err(AppError::validation("store.parent_tag is empty"));
        }
        Ok(())
    }

    /// Validate everything needed to talk to a live store.
    pub fn validate_store_credentials(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(AppError::config(
                "store.url is not set (SUPABASE_URL or NEXT_PUBLIC_SUPABASE_URL)",
            ));
        }
        url::Url::parse(&self.store.url)?;
        if self
            .store
            .service_key
            .as_deref()
            .is_none_or(|k| k.trim().is_empty())
        {
            return Err(AppError::config("store.service_key is not set (SUPA_SERVICE_KEY)"));
        }
        Ok(())
    }

    /// Copy of the configuration that is safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.store.service_key.is_some() {
            copy.store.service_key = Some("<redacted>".into());
        }
        copy
    }
}

/// Largest accepted creation window, in days.
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// Largest accepted staleness threshold, in hours.
pub const MAX_REFRESH_HOURS: u32 = 24 * MAX_WINDOW_DAYS;

/// Placeholder replaced by the record id in the endpoint template.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Candidate selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Only records created within this many days are considered
    #[serde(default = "defaults::window_days")]
    pub window_days: u32,

    /// Records refreshed within this many hours are skipped
    #[serde(default = "defaults::refresh_hours")]
    pub refresh_hours: u32,

    /// Rows requested per store page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            window_days: defaults::window_days(),
            refresh_hours: defaults::refresh_hours(),
            page_size: defaults::page_size(),
        }
    }
}

/// Upstream HTTP client and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Metrics endpoint, `{id}` is replaced by the record id
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Concurrent item workers
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Minimum delay before every upstream request, in seconds
    #[serde(default = "defaults::base_delay")]
    pub base_delay_secs: f64,

    /// Upper bound of the random delay added to `base_delay_secs`
    #[serde(default = "defaults::jitter")]
    pub jitter_secs: f64,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Fetch attempts per record within one run (1 = no retry)
    #[serde(default = "defaults::fetch_attempts")]
    pub fetch_attempts: u32,

    /// Backoff before the first retry, doubled on each further retry
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// User-Agent header for upstream requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header for upstream requests
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Referer header for upstream requests
    #[serde(default = "defaults::referer")]
    pub referer: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            workers: defaults::workers(),
            base_delay_secs: defaults::base_delay(),
            jitter_secs: defaults::jitter(),
            timeout_secs: defaults::timeout(),
            fetch_attempts: defaults::fetch_attempts(),
            retry_backoff_ms: defaults::retry_backoff(),
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            referer: defaults::referer(),
        }
    }
}

/// Store endpoint and table layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the PostgREST/Supabase project
    #[serde(default)]
    pub url: String,

    /// Service role key; normally provided through the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,

    /// Table holding category rows
    #[serde(default = "defaults::category_table")]
    pub category_table: String,

    /// Column linking a category to its parent tag
    #[serde(default = "defaults::parent_column")]
    pub parent_column: String,

    /// Parent tag whose child categories are refreshed
    #[serde(default = "defaults::parent_tag")]
    pub parent_tag: String,

    /// Table paged for candidates
    #[serde(default = "defaults::candidate_table")]
    pub candidate_table: String,

    /// Column used to order candidate pages
    #[serde(default = "defaults::order_key")]
    pub order_key: String,

    /// Tables receiving the write-back payload, in write order
    #[serde(default = "defaults::target_tables")]
    pub target_tables: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: None,
            category_table: defaults::category_table(),
            parent_column: defaults::parent_column(),
            parent_tag: defaults::parent_tag(),
            candidate_table: defaults::candidate_table(),
            order_key: defaults::order_key(),
            target_tables: defaults::target_tables(),
        }
    }
}

mod defaults {
    // Refresh defaults
    pub fn window_days() -> u32 {
        2
    }
    pub fn refresh_hours() -> u32 {
        6
    }
    pub fn page_size() -> usize {
        1000
    }

    // Crawler defaults
    pub fn endpoint() -> String {
        "https://kick.com/api/v2/clips/{id}".into()
    }
    pub fn workers() -> usize {
        3
    }
    pub fn base_delay() -> f64 {
        0.85
    }
    pub fn jitter() -> f64 {
        1.1
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn fetch_attempts() -> u32 {
        1
    }
    pub fn retry_backoff() -> u64 {
        1000
    }
    pub fn user_agent() -> String {
        concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
            "AppleWebKit/537.36 (KHTML, like Gecko) ",
            "Chrome/138.0.7204.169 Safari/537.36 Edg/138.0.3351.109"
        )
        .into()
    }
    pub fn accept_language() -> String {
        "en-US,en;q=0.9".into()
    }
    pub fn referer() -> String {
        "https://kick.com/".into()
    }

    // Store defaults
    pub fn category_table() -> String {
        "categories".into()
    }
    pub fn parent_column() -> String {
        "parent_category".into()
    }
    pub fn parent_tag() -> String {
        "irl".into()
    }
    pub fn candidate_table() -> String {
        "clips_recent".into()
    }
    pub fn order_key() -> String {
        "created_at".into()
    }
    pub fn target_tables() -> Vec<String> {
        vec!["clips".into(), "clips_recent".into()]
    }
}
