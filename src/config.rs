//! Tunables for a workflow run.

use crate::state::AnalysisMode;

/// Configuration shared by the driver and every stage agent.
///
/// Defaults match the production pipeline; tests dial individual knobs down
/// with the `with_*` setters.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Use the premium analysis model instead of the standard one.
    pub premium_analysis: bool,
    /// Upper bound on discovered competitors.
    pub max_competitors: usize,
    /// Search hits requested per competitor during research.
    pub hits_per_competitor: usize,
    /// Top-ranked URLs extracted per successful competitor.
    pub extract_urls_per_competitor: usize,
    /// Page cap per site for the crawl stage.
    pub crawl_pages_per_site: usize,
    /// Number of discovery search rounds before falling back to the LLM.
    pub discovery_search_rounds: usize,
    /// Discovery stops searching early once it has this multiple of the target.
    pub discovery_overshoot: f64,
    /// Per-document character budget when building the analysis context.
    pub context_slice_chars: usize,
    /// Streamed-analysis progress is forwarded every this many new characters.
    pub stream_flush_chars: usize,
    /// ... or every this many chunks, whichever comes first.
    pub stream_flush_chunks: usize,
    /// Model for standard-tier analysis.
    pub standard_model: String,
    /// Model for premium-tier analysis.
    pub premium_model: String,
    /// Model for utility calls (discovery filtering, chart extraction).
    pub utility_model: String,
    /// Token cap for the analysis narrative.
    pub analysis_max_tokens: u32,
    /// Token cap for the chart-extraction call.
    pub chart_max_tokens: u32,
    /// Domains excluded from every research search.
    pub excluded_domains: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            premium_analysis: false,
            max_competitors: 5,
            hits_per_competitor: 5,
            extract_urls_per_competitor: 2,
            crawl_pages_per_site: 5,
            discovery_search_rounds: 4,
            discovery_overshoot: 1.5,
            context_slice_chars: 2000,
            stream_flush_chars: 500,
            stream_flush_chunks: 20,
            standard_model: "gpt-4o-mini".to_string(),
            premium_model: "gpt-4o".to_string(),
            utility_model: "gpt-4o-mini".to_string(),
            analysis_max_tokens: 4000,
            chart_max_tokens: 1500,
            excluded_domains: vec!["wikipedia.org".to_string()],
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_premium_analysis(mut self, premium: bool) -> Self {
        self.premium_analysis = premium;
        self
    }

    pub fn with_max_competitors(mut self, max: usize) -> Self {
        self.max_competitors = max;
        self
    }

    pub fn with_hits_per_competitor(mut self, hits: usize) -> Self {
        self.hits_per_competitor = hits;
        self
    }

    pub fn with_stream_flush(mut self, chars: usize, chunks: usize) -> Self {
        self.stream_flush_chars = chars;
        self.stream_flush_chunks = chunks;
        self
    }

    pub fn with_context_slice_chars(mut self, chars: usize) -> Self {
        self.context_slice_chars = chars;
        self
    }

    /// The model the analysis stage should use for this run.
    pub fn analysis_model(&self) -> &str {
        if self.premium_analysis {
            &self.premium_model
        } else {
            &self.standard_model
        }
    }

    pub fn analysis_mode(&self) -> AnalysisMode {
        if self.premium_analysis {
            AnalysisMode::Premium
        } else {
            AnalysisMode::Standard
        }
    }

    /// Target count for discovery searches, including the overshoot margin.
    pub fn discovery_target(&self, needed: usize) -> usize {
        (needed as f64 * self.discovery_overshoot).ceil() as usize
    }
}
