//! Run driver: walks the workflow plan, merges stage updates, and owns every
//! write to the progress sink.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::agents::{
    Agent, AnalysisAgent, CrawlAgent, DiscoveryAgent, ExtractionAgent, ResearchAgent, StageContext,
};
use crate::clients::llm::CompletionProvider;
use crate::clients::search::SearchProvider;
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::graph::{Step, WorkflowGraph};
use crate::progress::{ProgressSink, SinkError, StreamGate};
use crate::state::{RunRequest, StageName, StageUpdate, WorkflowState, WorkflowStatus};

/// Generate a fresh run identifier.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Terminal view of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: WorkflowStatus,
    pub state: WorkflowState,
}

/// The assembled workflow: agents wired to providers, plus the graph that
/// sequences them.
pub struct Workflow {
    agents: HashMap<StageName, Box<dyn Agent>>,
    graph: WorkflowGraph,
    sink: Arc<dyn ProgressSink>,
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn CompletionProvider>,
        sink: Arc<dyn ProgressSink>,
        config: WorkflowConfig,
    ) -> Self {
        let mut agents: HashMap<StageName, Box<dyn Agent>> = HashMap::new();
        agents.insert(
            StageName::Discovery,
            Box::new(DiscoveryAgent::new(search.clone(), llm.clone(), config.clone())),
        );
        agents.insert(
            StageName::Research,
            Box::new(ResearchAgent::new(search.clone(), config.clone())),
        );
        agents.insert(
            StageName::Extraction,
            Box::new(ExtractionAgent::new(search.clone(), config.clone())),
        );
        agents.insert(StageName::Crawl, Box::new(CrawlAgent::new(search, config.clone())));
        agents.insert(StageName::Analysis, Box::new(AnalysisAgent::new(llm, config.clone())));

        Self {
            agents,
            graph: WorkflowGraph::standard(),
            sink,
            config,
        }
    }

    fn agent(&self, stage: StageName) -> &dyn Agent {
        // Every stage in the standard graph is registered in `new`.
        self.agents
            .get(&stage)
            .map(Box::as_ref)
            .unwrap_or_else(|| panic!("no agent registered for stage {stage}"))
    }

    /// Execute a run end to end. Fatal errors terminate the run and are
    /// reported through the returned status, never as a panic.
    pub async fn run(&self, run_id: &str, request: &RunRequest) -> RunReport {
        let state = WorkflowState::initial(request);

        if request.query.trim().is_empty() {
            return self.fail(run_id, state, "no research question provided").await;
        }
        if request.competitors.is_empty() && !request.use_auto_discovery {
            return self
                .fail(run_id, state, "no competitors provided and auto-discovery disabled")
                .await;
        }

        let plan = match self.graph.plan(WorkflowGraph::entry_for(request.use_auto_discovery)) {
            Ok(plan) => plan,
            Err(e) => return self.fail(run_id, state, &e.to_string()).await,
        };

        info!(run_id, steps = plan.len(), "starting workflow run");
        self.record_progress(run_id, &state).await;

        let mut state = state;
        for step in plan {
            // Research with nothing to research means upstream discovery
            // produced nothing; the run cannot recover.
            if matches!(step, Step::Stage(StageName::Research)) && state.competitors.is_empty() {
                return self
                    .fail(run_id, state, "no competitors available for research")
                    .await;
            }

            match step {
                Step::Stage(StageName::Analysis) => {
                    match self.run_analysis(run_id, &state).await {
                        Ok(update) => {
                            state = state.apply(update);
                            self.record_progress(run_id, &state).await;
                        }
                        Err(e) => return self.fail(run_id, state, &e.to_string()).await,
                    }
                }
                Step::Stage(stage) => {
                    let ctx = StageContext::detached();
                    match self.agent(stage).execute(&state, &ctx).await {
                        Ok(update) => {
                            state = state.apply(update);
                            self.record_progress(run_id, &state).await;
                        }
                        Err(e) => return self.fail(run_id, state, &e.to_string()).await,
                    }
                }
                Step::Parallel(branches) => {
                    let ctx = StageContext::detached();
                    let futures = branches
                        .iter()
                        .map(|stage| self.agent(*stage).execute(&state, &ctx));
                    let results = join_all(futures).await;

                    let mut updates: Vec<StageUpdate> = Vec::with_capacity(results.len());
                    for result in results {
                        match result {
                            Ok(update) => updates.push(update),
                            Err(e) => return self.fail(run_id, state, &e.to_string()).await,
                        }
                    }
                    state = state.apply_all(updates).with_step("gather_complete");
                    self.record_progress(run_id, &state).await;
                }
            }
        }

        // Item-level errors along the way do not demote the run; callers
        // read them from the errors list. A run that reached the end without
        // a narrative settles, but never as a clean completion.
        let status = if state.has_completed(StageName::Analysis) && state.analysis.is_some() {
            WorkflowStatus::Completed
        } else {
            state = state.with_error("Workflow warning: analysis produced no narrative");
            WorkflowStatus::CompletedWithWarning
        };
        state = state.with_step("complete");
        self.record_final(run_id, status, &state).await;
        info!(run_id, ?status, "workflow run finished");
        RunReport {
            run_id: run_id.to_string(),
            status,
            state,
        }
    }

    /// Analysis runs under a select loop so streamed partial text can be
    /// forwarded to the sink, throttled by the stream gate, while the agent
    /// is still working.
    async fn run_analysis(
        &self,
        run_id: &str,
        state: &WorkflowState,
    ) -> Result<StageUpdate, WorkflowError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = StageContext::with_partial_analysis(tx);
        let mut gate =
            StreamGate::new(self.config.stream_flush_chars, self.config.stream_flush_chunks);

        let agent = self.agent(StageName::Analysis);
        let fut = agent.execute(state, &ctx);
        tokio::pin!(fut);

        loop {
            tokio::select! {
                result = &mut fut => return result,
                Some(partial) = rx.recv() => {
                    if gate.observe(partial.len()) {
                        let mut snapshot = state.with_step("analysis_streaming");
                        snapshot.analysis = Some(partial);
                        self.record_progress(run_id, &snapshot).await;
                    }
                }
            }
        }
    }

    async fn fail(&self, run_id: &str, state: WorkflowState, reason: &str) -> RunReport {
        error!(run_id, reason, "workflow run failed");
        let state = state
            .with_error(format!("Workflow error: {reason}"))
            .with_step("failed");
        self.record_final(run_id, WorkflowStatus::Failed, &state).await;
        RunReport {
            run_id: run_id.to_string(),
            status: WorkflowStatus::Failed,
            state,
        }
    }

    // Sink writes are best-effort: a storage hiccup must not take down a run
    // that is otherwise making progress.
    async fn record_progress(&self, run_id: &str, state: &WorkflowState) {
        if let Err(e) = self.sink.record_progress(run_id, state).await {
            warn!(run_id, error = %e, "failed to record progress");
        }
    }

    async fn record_final(&self, run_id: &str, status: WorkflowStatus, state: &WorkflowState) {
        if let Err(e) = self.sink.record_final(run_id, status, state).await {
            warn!(run_id, error = %e, "failed to record final status");
        }
    }

    /// Settle a run that was interrupted mid-flight (process restart). A run
    /// still marked processing is finalized as failed.
    pub async fn reconcile(&self, run_id: &str) -> Result<Option<RunReport>, SinkError> {
        let Some(stored) = self.sink.fetch_last(run_id).await? else {
            return Ok(None);
        };
        if stored.status != WorkflowStatus::Processing {
            return Ok(Some(RunReport {
                run_id: run_id.to_string(),
                status: stored.status,
                state: stored.state,
            }));
        }

        warn!(run_id, "reconciling run stuck in processing");
        let state = stored
            .state
            .with_error("Workflow error: run interrupted before completion")
            .with_step("failed");
        self.sink
            .record_final(run_id, WorkflowStatus::Failed, &state)
            .await?;
        Ok(Some(RunReport {
            run_id: run_id.to_string(),
            status: WorkflowStatus::Failed,
            state,
        }))
    }
}
