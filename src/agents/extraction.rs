//! Extraction stage: full-content fetch of the top research hits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::agents::{Agent, StageContext};
use crate::clients::search::SearchProvider;
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::state::{ExtractedItem, StageName, StageOutput, StageUpdate, WorkflowState};

pub struct ExtractionAgent {
    search: Arc<dyn SearchProvider>,
    config: WorkflowConfig,
}

impl ExtractionAgent {
    pub fn new(search: Arc<dyn SearchProvider>, config: WorkflowConfig) -> Self {
        Self { search, config }
    }

    async fn extract_one(&self, competitor: String, url: String, title: String) -> ExtractedItem {
        match self.search.extract(&url).await {
            Ok(page) => ExtractedItem::Success {
                competitor,
                url,
                title,
                content_length: page.raw_content.len(),
                content: page.raw_content,
                extracted_at: Utc::now(),
            },
            Err(err) => {
                warn!(%url, error = %err, "extraction failed for url");
                ExtractedItem::Error {
                    competitor,
                    url,
                    error: err.to_string(),
                    extracted_at: Utc::now(),
                }
            }
        }
    }
}

#[async_trait]
impl Agent for ExtractionAgent {
    fn name(&self) -> StageName {
        StageName::Extraction
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError> {
        // Top-ranked URLs from each successful research record.
        let targets: Vec<(String, String, String)> = state
            .research_results
            .iter()
            .filter(|r| r.is_success())
            .flat_map(|r| {
                r.hits()
                    .iter()
                    .take(self.config.extract_urls_per_competitor)
                    .map(move |h| (r.competitor().to_string(), h.url.clone(), h.title.clone()))
            })
            .collect();

        if targets.is_empty() {
            return Ok(StageUpdate::new(StageOutput::Extraction { items: vec![] })
                .with_error("Extraction error: no research results to extract from"));
        }

        info!(urls = targets.len(), "extracting page content");
        let futures = targets
            .into_iter()
            .map(|(competitor, url, title)| self.extract_one(competitor, url, title));
        let items = join_all(futures).await;

        let failures: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                ExtractedItem::Error { url, error, .. } => {
                    Some(format!("Extraction error ({url}): {error}"))
                }
                _ => None,
            })
            .collect();

        let mut update = StageUpdate::new(StageOutput::Extraction { items });
        for failure in failures {
            update = update.with_error(failure);
        }
        Ok(update)
    }
}
