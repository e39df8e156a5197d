//! Multi-agent competitive intelligence workflow engine.
//!
//! A run moves a [`state::WorkflowState`] through a directed stage graph:
//! optional competitor discovery, per-competitor web research, concurrent
//! page extraction and site crawling, then a streamed LLM analysis. Stages
//! return partial updates that the driver merges with an order-independent
//! policy, so concurrent branches can settle in any order. Item-level
//! failures are folded into the state as error records; a run ends early
//! only on invalid input, a missing competitor list, or an analysis stream
//! that dies before producing anything.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use compintel::clients::{OpenAiClient, TavilyClient};
//! use compintel::config::WorkflowConfig;
//! use compintel::progress::MemorySink;
//! use compintel::state::RunRequest;
//! use compintel::Workflow;
//!
//! # async fn demo() {
//! let workflow = Workflow::new(
//!     Arc::new(TavilyClient::new("tavily-key")),
//!     Arc::new(OpenAiClient::new("openai-key")),
//!     Arc::new(MemorySink::new()),
//!     WorkflowConfig::default(),
//! );
//!
//! let request = RunRequest::new("How do competitors price their API tiers?", "Acme")
//!     .with_auto_discovery(5);
//! let run_id = compintel::driver::new_run_id();
//! let report = workflow.run(&run_id, &request).await;
//! println!("{:?}", report.status);
//! # }
//! ```

pub mod agents;
pub mod clients;
pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod progress;
pub mod prompts;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::WorkflowConfig;
pub use driver::{RunReport, Workflow};
pub use error::WorkflowError;
pub use state::{RunRequest, WorkflowState, WorkflowStatus};
