//! Stage agents.
//!
//! Each agent reads the state snapshot it is handed and returns a
//! [`StageUpdate`]; it never mutates shared state or writes to the progress
//! sink. `Ok` with error entries means item-level or stage-level failure the
//! run can absorb; `Err` means the run is over.

mod analysis;
mod crawl;
mod discovery;
mod extraction;
mod research;

pub use analysis::AnalysisAgent;
pub use crawl::CrawlAgent;
pub use discovery::DiscoveryAgent;
pub use extraction::ExtractionAgent;
pub use research::ResearchAgent;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WorkflowError;
use crate::state::{StageName, StageUpdate, WorkflowState};

/// Per-execution plumbing handed to an agent by the driver.
#[derive(Debug, Default)]
pub struct StageContext {
    /// Channel for streaming partial analysis text up to the driver. Only
    /// the analysis agent uses it; other stages get a detached context.
    pub partial_analysis: Option<mpsc::UnboundedSender<String>>,
}

impl StageContext {
    /// A context with no streaming channel attached.
    pub fn detached() -> Self {
        Self { partial_analysis: None }
    }

    pub fn with_partial_analysis(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { partial_analysis: Some(sender) }
    }
}

/// One vertex of the workflow graph.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> StageName;

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageUpdate, WorkflowError>;
}
