//! Web search and content extraction client (Tavily API).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid API key")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl SearchError {
    /// Transient errors are retried with exponential backoff; everything
    /// else fails the call immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout
                | SearchError::Connection(_)
                | SearchError::Network(_)
                | SearchError::RateLimited
                | SearchError::Server { .. }
        )
    }
}

/// Search ranking depth supported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

/// Parameters for one search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub depth: SearchDepth,
    pub max_results: usize,
    /// Restrict results to the last N days, when set.
    pub time_range_days: Option<u32>,
    pub exclude_domains: Vec<String>,
    /// Ask the API to synthesize a short answer across the hits.
    pub include_answer: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            depth: SearchDepth::Advanced,
            max_results: 5,
            time_range_days: None,
            exclude_domains: Vec::new(),
            include_answer: true,
        }
    }

    pub fn with_depth(mut self, depth: SearchDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_time_range_days(mut self, days: Option<u32>) -> Self {
        self.time_range_days = days;
        self
    }

    pub fn with_exclude_domains(mut self, domains: Vec<String>) -> Self {
        self.exclude_domains = domains;
        self
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// A search response: an optional synthesized answer plus ranked hits.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// A page fetched by the extract endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    #[serde(default)]
    pub raw_content: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    results: Vec<ExtractedPage>,
    #[serde(default)]
    failed_results: Vec<serde_json::Value>,
}

/// Search and extraction capability as the agents see it.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError>;

    /// Fetch the full content of a single URL.
    async fn extract(&self, url: &str) -> Result<ExtractedPage, SearchError>;
}

/// Tavily HTTP client with bounded timeouts and retry on transient errors.
#[derive(Debug, Clone)]
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            max_retries: MAX_RETRIES,
        }
    }

    /// Point the client at a different server. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SearchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            match self.post_once(&url, body).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(%url, attempt, delay_ms = delay, error = %err, "retrying request");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, SearchError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else if e.is_connect() {
                    SearchError::Connection(e.to_string())
                } else {
                    SearchError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SearchError::Parse(e.to_string()));
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => SearchError::Unauthorized,
            429 => SearchError::RateLimited,
            400 => SearchError::BadRequest(message),
            s if (500..600).contains(&s) => SearchError::Server { status: s, message },
            s => SearchError::Http { status: s, message },
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let mut body = serde_json::json!({
            "query": request.query,
            "search_depth": request.depth,
            "max_results": request.max_results,
            "include_answer": request.include_answer,
        });
        if let Some(days) = request.time_range_days {
            body["days"] = days.into();
        }
        if !request.exclude_domains.is_empty() {
            body["exclude_domains"] = serde_json::json!(request.exclude_domains);
        }

        debug!(query = %request.query, max_results = request.max_results, "search request");
        self.post_json("/search", &body).await
    }

    async fn extract(&self, url: &str) -> Result<ExtractedPage, SearchError> {
        let body = serde_json::json!({ "urls": [url] });
        debug!(%url, "extract request");
        let response: ExtractResponse = self.post_json("/extract", &body).await?;
        response.results.into_iter().next().ok_or_else(|| {
            let detail = response
                .failed_results
                .first()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "no content returned".to_string());
            SearchError::Parse(format!("extraction returned no results for {url}: {detail}"))
        })
    }
}
