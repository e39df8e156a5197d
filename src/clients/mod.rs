//! External service clients.
//!
//! Stages depend on the [`search::SearchProvider`] and
//! [`llm::CompletionProvider`] traits, never on a concrete client, so tests
//! can script both collaborators.

pub mod llm;
pub mod search;

pub use llm::{CompletionProvider, CompletionRequest, CompletionStream, LlmError, OpenAiClient};
pub use search::{SearchError, SearchHit, SearchProvider, SearchRequest, TavilyClient};
