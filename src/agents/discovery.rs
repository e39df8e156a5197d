//! Discovery stage: find competitors automatically from a company name.
//!
//! Pipeline: profile the company, run a handful of competitor searches with
//! an LLM filter over each result set, top up from the model's own knowledge
//! if the searches come up short, then dedupe and cap.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::agents::{Agent, StageContext};
use crate::clients::llm::{strip_json_fences, CompletionProvider, CompletionRequest};
use crate::clients::search::{SearchProvider, SearchRequest};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::prompts;
use crate::state::{
    dedup_preserving_order, CompanyProfile, StageName, StageOutput, StageUpdate, WorkflowState,
};

#[derive(Debug, Deserialize)]
struct CompetitorList {
    #[serde(default)]
    competitors: Vec<String>,
}

pub struct DiscoveryAgent {
    search: Arc<dyn SearchProvider>,
    llm: Arc<dyn CompletionProvider>,
    config: WorkflowConfig,
}

impl DiscoveryAgent {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn CompletionProvider>,
        config: WorkflowConfig,
    ) -> Self {
        Self { search, llm, config }
    }

    async fn profile_company(&self, company: &str) -> Option<CompanyProfile> {
        let request = CompletionRequest::new(
            &self.config.utility_model,
            prompts::company_profile_system(),
            prompts::company_profile_user(company),
        )
        .with_temperature(0.1)
        .with_max_tokens(500)
        .json_only();

        match self.llm.complete(&request).await {
            Ok(text) => match serde_json::from_str(strip_json_fences(&text)) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    debug!(error = %e, "company profile response was not valid JSON");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "company profile call failed");
                None
            }
        }
    }

    fn search_queries(&self, company: &str, profile: Option<&CompanyProfile>) -> Vec<String> {
        let mut queries = vec![
            format!("{company} competitors alternatives"),
            format!("{company} vs comparison"),
            format!("best alternatives to {company}"),
        ];
        match profile {
            Some(p) if !p.primary_business.is_empty() => {
                queries.push(format!("top {} companies", p.primary_business));
            }
            _ => queries.push(format!("{company} competitors list")),
        }
        queries.truncate(self.config.discovery_search_rounds);
        queries
    }

    /// Ask the LLM to pull competitor names out of one search's hits.
    async fn filter_competitors(
        &self,
        company: &str,
        profile_summary: &str,
        results_block: &str,
    ) -> Vec<String> {
        let request = CompletionRequest::new(
            &self.config.utility_model,
            prompts::competitor_filter_system(company, profile_summary),
            prompts::competitor_filter_user(results_block),
        )
        .with_temperature(0.1)
        .with_max_tokens(500)
        .json_only();

        match self.llm.complete(&request).await {
            Ok(text) => serde_json::from_str::<CompetitorList>(strip_json_fences(&text))
                .map(|l| l.competitors)
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "competitor filter call failed");
                Vec::new()
            }
        }
    }

    async fn known_competitors(&self, company: &str, count: usize) -> Vec<String> {
        let request = CompletionRequest::new(
            &self.config.utility_model,
            prompts::known_competitors_system(),
            prompts::known_competitors_user(company, count),
        )
        .with_temperature(0.1)
        .with_max_tokens(500)
        .json_only();

        match self.llm.complete(&request).await {
            Ok(text) => serde_json::from_str::<CompetitorList>(strip_json_fences(&text))
                .map(|l| l.competitors)
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "known-competitor fallback failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Agent for DiscoveryAgent {
    fn name(&self) -> StageName {
        StageName::Discovery
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError> {
        let company = state.company_name.trim();
        if company.is_empty() {
            return Ok(StageUpdate::new(StageOutput::Discovery {
                competitors: vec![],
                profile: None,
            })
            .with_error("Discovery error: no company name provided"));
        }

        let needed = state.max_competitors.min(self.config.max_competitors).max(1);
        let target = self.config.discovery_target(needed);

        let profile = self.profile_company(company).await;
        let profile_summary = profile
            .as_ref()
            .map(|p| p.primary_business.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let mut found: Vec<String> = Vec::new();
        let mut search_errors: Vec<String> = Vec::new();
        for query in self.search_queries(company, profile.as_ref()) {
            let request = SearchRequest::new(&query)
                .with_max_results(5)
                .with_exclude_domains(self.config.excluded_domains.clone());
            match self.search.search(&request).await {
                Ok(response) if !response.results.is_empty() => {
                    let block = response
                        .results
                        .iter()
                        .map(|h| format!("- {}: {}", h.title, h.content))
                        .collect::<Vec<_>>()
                        .join("\n");
                    found.extend(self.filter_competitors(company, &profile_summary, &block).await);
                }
                Ok(_) => debug!(%query, "discovery search returned no hits"),
                Err(e) => {
                    warn!(%query, error = %e, "discovery search failed");
                    search_errors.push(format!("Discovery search error ({query}): {e}"));
                }
            }
            if found.len() >= target {
                debug!(found = found.len(), target, "discovery target reached early");
                break;
            }
        }

        let lowercase_company = company.to_lowercase();
        let mut competitors: Vec<String> = dedup_preserving_order(found)
            .into_iter()
            .filter(|c| c.to_lowercase() != lowercase_company)
            .collect();

        if competitors.len() < needed {
            let extra = self.known_competitors(company, needed * 2).await;
            competitors.extend(extra);
            competitors = dedup_preserving_order(competitors)
                .into_iter()
                .filter(|c| c.to_lowercase() != lowercase_company)
                .collect();
        }
        competitors.truncate(needed);

        info!(count = competitors.len(), "discovery finished");
        let mut update = StageUpdate::new(StageOutput::Discovery {
            competitors: competitors.clone(),
            profile,
        });
        if competitors.is_empty() {
            update = update.with_error("Discovery error: no competitors found");
        }
        for err in search_errors {
            update = update.with_error(err);
        }
        Ok(update)
    }
}
