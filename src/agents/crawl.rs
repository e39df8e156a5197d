//! Crawl stage: site-scoped sweep of each competitor's own pages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::agents::{Agent, StageContext};
use crate::clients::search::{SearchHit, SearchProvider, SearchRequest};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::state::{CrawlFocus, CrawlResult, StageName, StageOutput, StageUpdate, WorkflowState};

const PAGE_BREAK: &str = "\n\n---PAGE BREAK---\n\n";

pub struct CrawlAgent {
    search: Arc<dyn SearchProvider>,
    config: WorkflowConfig,
}

impl CrawlAgent {
    pub fn new(search: Arc<dyn SearchProvider>, config: WorkflowConfig) -> Self {
        Self { search, config }
    }

    /// Pick the most valuable starting point among a competitor's hits.
    ///
    /// Priority: pricing pages, then feature pages, then documentation,
    /// then whatever ranked first.
    fn pick_start(hits: &[SearchHit]) -> Option<(String, CrawlFocus)> {
        const PRIORITIES: &[(CrawlFocus, &[&str])] = &[
            (CrawlFocus::Pricing, &["pricing", "plans", "cost"]),
            (CrawlFocus::Features, &["features", "capabilities", "product"]),
            (CrawlFocus::Documentation, &["docs", "documentation", "api"]),
        ];
        for (focus, keywords) in PRIORITIES {
            if let Some(hit) = hits.iter().find(|h| {
                let haystack = format!("{} {}", h.url, h.title).to_lowercase();
                keywords.iter().any(|k| haystack.contains(k))
            }) {
                return Some((hit.url.clone(), *focus));
            }
        }
        hits.first().map(|h| (h.url.clone(), CrawlFocus::Homepage))
    }

    fn domain_of(url: &str) -> Option<String> {
        let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
        let host = rest.split('/').next()?;
        Some(host.trim_start_matches("www.").to_string())
    }

    async fn crawl_one(&self, competitor: String, start_url: String, focus: CrawlFocus) -> CrawlResult {
        let Some(domain) = Self::domain_of(&start_url) else {
            return CrawlResult::Error {
                competitor,
                start_url: start_url.clone(),
                error: format!("could not derive a domain from {start_url}"),
                crawled_at: Utc::now(),
            };
        };

        let query = format!("site:{domain} {focus} features pricing plans");
        let request = SearchRequest::new(query)
            .with_max_results(self.config.crawl_pages_per_site)
            .with_exclude_domains(self.config.excluded_domains.clone());

        match self.search.search(&request).await {
            Ok(response) => {
                let pages: Vec<&SearchHit> = response
                    .results
                    .iter()
                    .filter(|h| !h.content.is_empty())
                    .take(self.config.crawl_pages_per_site)
                    .collect();
                let combined_content = pages
                    .iter()
                    .map(|h| h.content.as_str())
                    .collect::<Vec<_>>()
                    .join(PAGE_BREAK);
                CrawlResult::Success {
                    competitor,
                    start_url,
                    focus,
                    pages_crawled: pages.len(),
                    urls: pages.iter().map(|h| h.url.clone()).collect(),
                    content_length: combined_content.len(),
                    combined_content,
                    crawled_at: Utc::now(),
                }
            }
            Err(err) => {
                warn!(competitor, %start_url, error = %err, "crawl failed for site");
                CrawlResult::Error {
                    competitor,
                    start_url,
                    error: err.to_string(),
                    crawled_at: Utc::now(),
                }
            }
        }
    }
}

#[async_trait]
impl Agent for CrawlAgent {
    fn name(&self) -> StageName {
        StageName::Crawl
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError> {
        let targets: Vec<(String, String, CrawlFocus)> = state
            .research_results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| {
                Self::pick_start(r.hits())
                    .map(|(url, focus)| (r.competitor().to_string(), url, focus))
            })
            .collect();

        if targets.is_empty() {
            return Ok(StageUpdate::new(StageOutput::Crawl { results: vec![] })
                .with_error("Crawl error: no research results to crawl from"));
        }

        info!(sites = targets.len(), "crawling competitor sites");
        let futures = targets
            .into_iter()
            .map(|(competitor, url, focus)| self.crawl_one(competitor, url, focus));
        let results = join_all(futures).await;

        let failures: Vec<String> = results
            .iter()
            .filter_map(|r| match r {
                CrawlResult::Error { competitor, error, .. } => {
                    Some(format!("Crawl error ({competitor}): {error}"))
                }
                _ => None,
            })
            .collect();

        let mut update = StageUpdate::new(StageOutput::Crawl { results });
        for failure in failures {
            update = update.with_error(failure);
        }
        Ok(update)
    }
}
