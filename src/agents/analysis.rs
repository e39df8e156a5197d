//! Analysis stage: streamed narrative synthesis plus chart extraction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::agents::{Agent, StageContext};
use crate::clients::llm::{strip_json_fences, CompletionProvider, CompletionRequest};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::prompts;
use crate::state::{ChartData, StageName, StageOutput, StageUpdate, WorkflowState};

pub struct AnalysisAgent {
    llm: Arc<dyn CompletionProvider>,
    config: WorkflowConfig,
}

impl AnalysisAgent {
    pub fn new(llm: Arc<dyn CompletionProvider>, config: WorkflowConfig) -> Self {
        Self { llm, config }
    }

    /// Clip a document to the per-document budget, marking the cut.
    fn slice(&self, text: &str) -> String {
        let max = self.config.context_slice_chars;
        if text.chars().count() <= max {
            return text.to_string();
        }
        let clipped: String = text.chars().take(max).collect();
        format!("{clipped}... [truncated]")
    }

    /// Assemble the research context the narrative is grounded in.
    fn build_context(&self, state: &WorkflowState) -> String {
        let mut sections = Vec::new();

        let summaries: Vec<String> = state
            .research_results
            .iter()
            .filter_map(|r| match r {
                crate::state::ResearchResult::Success { competitor, summary, .. } => {
                    Some(format!("--- {competitor} ---\n{}", self.slice(summary)))
                }
                _ => None,
            })
            .collect();
        if !summaries.is_empty() {
            sections.push(format!("=== RESEARCH SUMMARIES ===\n{}", summaries.join("\n\n")));
        }

        let pages: Vec<String> = state
            .extracted_data
            .iter()
            .filter_map(|i| match i {
                crate::state::ExtractedItem::Success { competitor, url, content, .. } => {
                    Some(format!("--- {competitor}: {url} ---\n{}", self.slice(content)))
                }
                _ => None,
            })
            .collect();
        if !pages.is_empty() {
            sections.push(format!("=== EXTRACTED PAGES ===\n{}", pages.join("\n\n")));
        }

        let crawls: Vec<String> = state
            .crawl_results
            .iter()
            .filter_map(|c| match c {
                crate::state::CrawlResult::Success {
                    competitor, focus, combined_content, ..
                } => Some(format!(
                    "--- {competitor} ({focus}) ---\n{}",
                    self.slice(combined_content)
                )),
                _ => None,
            })
            .collect();
        if !crawls.is_empty() {
            sections.push(format!("=== CRAWLED SITES ===\n{}", crawls.join("\n\n")));
        }

        sections.join("\n\n")
    }

    /// Stream the narrative, forwarding accumulated text through the
    /// context channel after every delta.
    async fn stream_narrative(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
        context: &str,
    ) -> Result<(String, Option<String>), WorkflowError> {
        let request = CompletionRequest::new(
            self.config.analysis_model(),
            prompts::analysis_system(&state.company_name),
            prompts::analysis_user(&state.query, &state.company_name, &state.competitors, context),
        )
        .with_temperature(0.3)
        .with_max_tokens(self.config.analysis_max_tokens);

        let mut stream = self.llm.stream(&request).await?;
        let mut accumulated = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if chunk.done {
                        break;
                    }
                    accumulated.push_str(&chunk.delta);
                    if let Some(sender) = &ctx.partial_analysis {
                        // The driver may have stopped listening; that is its
                        // call, not ours.
                        let _ = sender.send(accumulated.clone());
                    }
                }
                Err(err) => {
                    if accumulated.is_empty() {
                        return Err(WorkflowError::AnalysisFailed(format!(
                            "stream failed before any output: {err}"
                        )));
                    }
                    warn!(error = %err, chars = accumulated.len(), "analysis stream interrupted, keeping partial narrative");
                    return Ok((
                        accumulated,
                        Some(format!("Analysis error: narrative truncated by stream failure: {err}")),
                    ));
                }
            }
        }
        if accumulated.is_empty() {
            return Err(WorkflowError::AnalysisFailed(
                "stream produced no output".to_string(),
            ));
        }
        Ok((accumulated, None))
    }

    /// Second pass: distill the narrative into chart-ready JSON. Failure
    /// downgrades to running without charts.
    async fn extract_charts(&self, narrative: &str) -> Option<ChartData> {
        let request = CompletionRequest::new(
            &self.config.utility_model,
            prompts::chart_extraction_system(),
            prompts::chart_extraction_user(narrative),
        )
        .with_temperature(0.1)
        .with_max_tokens(self.config.chart_max_tokens)
        .json_only();

        let text = match self.llm.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "chart extraction call failed, continuing without charts");
                return None;
            }
        };
        let value = match serde_json::from_str(strip_json_fences(&text)) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "chart extraction returned invalid JSON");
                return None;
            }
        };
        let charts = ChartData::from_value(value);
        if charts.is_none() {
            debug!("chart extraction JSON did not have the expected shape");
        }
        charts
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn name(&self) -> StageName {
        StageName::Analysis
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError> {
        let context = self.build_context(state);
        if context.is_empty() {
            // Nothing gathered upstream. The stage still settles; the driver
            // decides what an empty narrative means for the final status.
            warn!("no gathered data to analyze");
            return Ok(StageUpdate::new(StageOutput::Analysis {
                narrative: None,
                charts: None,
                mode: self.config.analysis_mode(),
            })
            .with_error("Analysis error: no research data to analyze"));
        }

        info!(model = self.config.analysis_model(), context_chars = context.len(), "starting analysis");
        let (narrative, stream_error) = self.stream_narrative(state, ctx, &context).await?;
        let charts = self.extract_charts(&narrative).await;

        let mut update = StageUpdate::new(StageOutput::Analysis {
            narrative: Some(narrative),
            charts,
            mode: self.config.analysis_mode(),
        });
        if let Some(err) = stream_error {
            update = update.with_error(err);
        }
        Ok(update)
    }
}
