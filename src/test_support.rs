//! Scriptable provider fakes shared by agent and driver tests.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;

use crate::clients::llm::{
    CompletionChunk, CompletionProvider, CompletionRequest, CompletionStream, LlmError,
};
use crate::clients::search::{
    ExtractedPage, SearchError, SearchHit, SearchProvider, SearchRequest, SearchResponse,
};

pub fn hit(url: &str, title: &str, content: &str) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        score: 0.5,
    }
}

/// Search provider scripted per exact query string. Unscripted queries
/// succeed with no hits; unscripted extractions fail.
#[derive(Default)]
pub struct ScriptedSearch {
    answers: HashMap<String, String>,
    hits: HashMap<String, Vec<SearchHit>>,
    failures: HashMap<String, String>,
    pages: HashMap<String, String>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_for(mut self, query: &str, answer: &str) -> Self {
        self.answers.insert(query.to_string(), answer.to_string());
        self
    }

    pub fn hits_for(mut self, query: &str, hits: Vec<(&str, &str, &str)>) -> Self {
        self.hits.insert(
            query.to_string(),
            hits.into_iter().map(|(u, t, c)| hit(u, t, c)).collect(),
        );
        self
    }

    pub fn fail_for(mut self, query: &str, error: &str) -> Self {
        self.failures.insert(query.to_string(), error.to_string());
        self
    }

    pub fn page_for(mut self, url: &str, content: &str) -> Self {
        self.pages.insert(url.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        if let Some(error) = self.failures.get(&request.query) {
            return Err(SearchError::Network(error.clone()));
        }
        Ok(SearchResponse {
            answer: self.answers.get(&request.query).cloned(),
            results: self.hits.get(&request.query).cloned().unwrap_or_default(),
        })
    }

    async fn extract(&self, url: &str) -> Result<ExtractedPage, SearchError> {
        match self.pages.get(url) {
            Some(content) => Ok(ExtractedPage {
                url: url.to_string(),
                raw_content: content.clone(),
            }),
            None => Err(SearchError::Parse(format!("no scripted page for {url}"))),
        }
    }
}

/// A chunk stream that yields to the scheduler between items, so a consumer
/// cannot drain it in a single poll.
fn scripted_stream(items: Vec<Result<CompletionChunk, LlmError>>) -> CompletionStream {
    let stream = futures::stream::iter(items).then(|item| async move {
        tokio::task::yield_now().await;
        item
    });
    CompletionStream::new(stream.boxed())
}

enum StreamScript {
    Chunks(Vec<String>),
    FailAfter(Vec<String>, String),
}

/// Completion provider scripted by substring match on the system prompt.
/// Unscripted calls fail.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Vec<(String, String)>,
    streams: Vec<(String, StreamScript)>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_containing(mut self, system_fragment: &str, reply: &str) -> Self {
        self.replies.push((system_fragment.to_string(), reply.to_string()));
        self
    }

    pub fn stream_containing(mut self, system_fragment: &str, chunks: Vec<&str>) -> Self {
        self.streams.push((
            system_fragment.to_string(),
            StreamScript::Chunks(chunks.into_iter().map(String::from).collect()),
        ));
        self
    }

    pub fn stream_failing_after(
        mut self,
        system_fragment: &str,
        chunks: Vec<&str>,
        error: &str,
    ) -> Self {
        self.streams.push((
            system_fragment.to_string(),
            StreamScript::FailAfter(
                chunks.into_iter().map(String::from).collect(),
                error.to_string(),
            ),
        ));
        self
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.replies
            .iter()
            .find(|(fragment, _)| request.system.contains(fragment.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| LlmError::Parse("no scripted reply for this prompt".to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let script = self
            .streams
            .iter()
            .find(|(fragment, _)| request.system.contains(fragment.as_str()));
        match script {
            Some((_, StreamScript::Chunks(chunks))) => {
                let mut items: Vec<Result<CompletionChunk, LlmError>> =
                    chunks.iter().map(|c| Ok(CompletionChunk::delta(c))).collect();
                items.push(Ok(CompletionChunk::done()));
                Ok(scripted_stream(items))
            }
            Some((_, StreamScript::FailAfter(chunks, error))) => {
                let mut items: Vec<Result<CompletionChunk, LlmError>> =
                    chunks.iter().map(|c| Ok(CompletionChunk::delta(c))).collect();
                items.push(Err(LlmError::StreamInterrupted(error.clone())));
                Ok(scripted_stream(items))
            }
            None => {
                let text = self.complete(request).await?;
                Ok(CompletionStream::from_complete(text))
            }
        }
    }
}
