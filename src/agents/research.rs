//! Research stage: one web search per competitor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::agents::{Agent, StageContext};
use crate::clients::search::{SearchProvider, SearchRequest};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::state::{ResearchResult, StageName, StageOutput, StageUpdate, WorkflowState};

pub struct ResearchAgent {
    search: Arc<dyn SearchProvider>,
    config: WorkflowConfig,
}

impl ResearchAgent {
    pub fn new(search: Arc<dyn SearchProvider>, config: WorkflowConfig) -> Self {
        Self { search, config }
    }

    async fn research_one(&self, competitor: &str, state: &WorkflowState) -> ResearchResult {
        let query = format!("{competitor} {}", state.query);
        let request = SearchRequest::new(&query)
            .with_max_results(self.config.hits_per_competitor)
            .with_time_range_days(state.freshness.days())
            .with_exclude_domains(self.config.excluded_domains.clone());

        match self.search.search(&request).await {
            Ok(response) => {
                let summary = response.answer.filter(|a| !a.trim().is_empty()).unwrap_or_else(|| {
                    response
                        .results
                        .iter()
                        .take(3)
                        .map(|h| h.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                });
                ResearchResult::Success {
                    competitor: competitor.to_string(),
                    query,
                    summary,
                    hits: response.results,
                    fetched_at: Utc::now(),
                }
            }
            Err(err) => {
                warn!(competitor, error = %err, "research failed for competitor");
                ResearchResult::Error {
                    competitor: competitor.to_string(),
                    query,
                    error: err.to_string(),
                    fetched_at: Utc::now(),
                }
            }
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> StageName {
        StageName::Research
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        _ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError> {
        if state.competitors.is_empty() {
            return Ok(StageUpdate::new(StageOutput::Research { results: vec![] })
                .with_error("Research error: no competitors to research"));
        }

        info!(count = state.competitors.len(), "researching competitors");
        let futures = state
            .competitors
            .iter()
            .map(|c| self.research_one(c, state));
        let results = join_all(futures).await;

        let failures: Vec<String> = results
            .iter()
            .filter_map(|r| match r {
                ResearchResult::Error { competitor, error, .. } => {
                    Some(format!("Research error ({competitor}): {error}"))
                }
                _ => None,
            })
            .collect();

        let mut update = StageUpdate::new(StageOutput::Research { results });
        for failure in failures {
            update = update.with_error(failure);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunRequest;
    use crate::test_support::ScriptedSearch;

    fn state_with(competitors: Vec<&str>) -> WorkflowState {
        let request = RunRequest::new("pricing strategy", "Acme")
            .with_competitors(competitors.into_iter().map(String::from).collect());
        WorkflowState::initial(&request)
    }

    #[tokio::test]
    async fn one_record_per_competitor_with_failures_isolated() {
        let search = ScriptedSearch::new()
            .answer_for("Alpha pricing strategy", "Alpha summary")
            .fail_for("Beta pricing strategy", "timeout")
            .answer_for("Gamma pricing strategy", "Gamma summary");
        let agent = ResearchAgent::new(Arc::new(search), WorkflowConfig::default());

        let update = agent
            .execute(&state_with(vec!["Alpha", "Beta", "Gamma"]), &StageContext::detached())
            .await
            .unwrap();

        let StageOutput::Research { results } = &update.output else {
            panic!("wrong output variant");
        };
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());
        assert_eq!(update.errors.len(), 1);
        assert!(update.errors[0].contains("Beta"));
    }

    #[tokio::test]
    async fn empty_competitor_list_yields_empty_update_with_error() {
        let agent = ResearchAgent::new(Arc::new(ScriptedSearch::new()), WorkflowConfig::default());
        let update = agent
            .execute(&state_with(vec![]), &StageContext::detached())
            .await
            .unwrap();

        let StageOutput::Research { results } = &update.output else {
            panic!("wrong output variant");
        };
        assert!(results.is_empty());
        assert_eq!(update.errors.len(), 1);
        assert_eq!(update.stage, StageName::Research);
    }

    #[tokio::test]
    async fn summary_falls_back_to_hit_content_without_answer() {
        let search = ScriptedSearch::new().hits_for(
            "Alpha pricing strategy",
            vec![("https://alpha.example/pricing", "Pricing", "Plans start at $10")],
        );
        let agent = ResearchAgent::new(Arc::new(search), WorkflowConfig::default());

        let update = agent
            .execute(&state_with(vec!["Alpha"]), &StageContext::detached())
            .await
            .unwrap();
        let StageOutput::Research { results } = &update.output else {
            panic!("wrong output variant");
        };
        let ResearchResult::Success { summary, .. } = &results[0] else {
            panic!("expected success");
        };
        assert_eq!(summary, "Plans start at $10");
    }
}
