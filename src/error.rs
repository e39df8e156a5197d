//! Top-level workflow error type.
//!
//! Item-level failures (one competitor's search, one URL's extraction) are
//! encoded as error records in the state, not as this type. A
//! `WorkflowError` coming out of a stage means the whole run is over.

use thiserror::Error;

use crate::clients::llm::LlmError;
use crate::clients::search::SearchError;
use crate::graph::GraphBuildError;
use crate::progress::SinkError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("search provider error: {0}")]
    Search(#[from] SearchError),

    #[error("llm provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("progress sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("workflow graph error: {0}")]
    Graph(#[from] GraphBuildError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
}
