//! Workflow state and the merge policy that combines stage outputs.
//!
//! The state is mutable-by-replacement: a stage never edits the snapshot it
//! was given, it returns a [`StageUpdate`] and the driver produces the next
//! snapshot with [`WorkflowState::apply`]. When two branches of the graph run
//! concurrently their updates are combined with [`WorkflowState::apply_all`],
//! which normalizes application order by the canonical [`StageName`] ordering
//! so that the merge is commutative.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::search::SearchHit;

/// Identifier for a stage in the workflow graph.
///
/// The declaration order is the canonical merge order: updates produced by
/// concurrent branches are sorted by this ordering before being folded into
/// the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Discovery,
    Research,
    Extraction,
    Crawl,
    Analysis,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Discovery => "discovery",
            StageName::Research => "research",
            StageName::Extraction => "extraction",
            StageName::Crawl => "crawl",
            StageName::Analysis => "analysis",
        }
    }

    /// All stages in canonical order.
    pub fn all() -> [StageName; 5] {
        [
            StageName::Discovery,
            StageName::Research,
            StageName::Extraction,
            StageName::Crawl,
            StageName::Analysis,
        ]
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recency window for research searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    #[default]
    #[serde(rename = "anytime")]
    Anytime,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3months")]
    ThreeMonths,
    #[serde(rename = "6months")]
    SixMonths,
    #[serde(rename = "1year")]
    OneYear,
}

impl Freshness {
    /// Time window in days for the search API, `None` for no limit.
    pub fn days(&self) -> Option<u32> {
        match self {
            Freshness::Anytime => None,
            Freshness::OneMonth => Some(30),
            Freshness::ThreeMonths => Some(90),
            Freshness::SixMonths => Some(180),
            Freshness::OneYear => Some(365),
        }
    }
}

/// Quality tier for the analysis completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Standard,
    Premium,
}

/// Company profile produced by the discovery stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub primary_business: String,
    pub target_customer: String,
    pub value_proposition: String,
    pub market_segment: String,
    #[serde(default)]
    pub search_terms: Vec<String>,
}

/// One competitor's research outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResearchResult {
    Success {
        competitor: String,
        query: String,
        summary: String,
        hits: Vec<SearchHit>,
        fetched_at: DateTime<Utc>,
    },
    Error {
        competitor: String,
        query: String,
        error: String,
        fetched_at: DateTime<Utc>,
    },
}

impl ResearchResult {
    pub fn competitor(&self) -> &str {
        match self {
            ResearchResult::Success { competitor, .. } | ResearchResult::Error { competitor, .. } => {
                competitor
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResearchResult::Success { .. })
    }

    /// The ranked hits, empty for error records.
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            ResearchResult::Success { hits, .. } => hits,
            ResearchResult::Error { .. } => &[],
        }
    }
}

/// One URL's extraction outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExtractedItem {
    Success {
        competitor: String,
        url: String,
        title: String,
        content: String,
        content_length: usize,
        extracted_at: DateTime<Utc>,
    },
    Error {
        competitor: String,
        url: String,
        error: String,
        extracted_at: DateTime<Utc>,
    },
}

impl ExtractedItem {
    pub fn competitor(&self) -> &str {
        match self {
            ExtractedItem::Success { competitor, .. } | ExtractedItem::Error { competitor, .. } => {
                competitor
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractedItem::Success { .. })
    }
}

/// Section of a competitor site targeted by the crawl stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlFocus {
    Pricing,
    Features,
    Documentation,
    Homepage,
}

impl CrawlFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlFocus::Pricing => "pricing",
            CrawlFocus::Features => "features",
            CrawlFocus::Documentation => "documentation",
            CrawlFocus::Homepage => "homepage",
        }
    }
}

impl fmt::Display for CrawlFocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One competitor's crawl outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CrawlResult {
    Success {
        competitor: String,
        start_url: String,
        focus: CrawlFocus,
        pages_crawled: usize,
        urls: Vec<String>,
        combined_content: String,
        content_length: usize,
        crawled_at: DateTime<Utc>,
    },
    Error {
        competitor: String,
        start_url: String,
        error: String,
        crawled_at: DateTime<Utc>,
    },
}

impl CrawlResult {
    pub fn competitor(&self) -> &str {
        match self {
            CrawlResult::Success { competitor, .. } | CrawlResult::Error { competitor, .. } => {
                competitor
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CrawlResult::Success { .. })
    }
}

/// Structured chart data extracted from the analysis narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub pricing: Vec<Value>,
    pub features: Vec<Value>,
    pub risks: Vec<Value>,
}

impl ChartData {
    /// Validate a raw JSON value into chart data.
    ///
    /// All three keys must be present and list-typed, otherwise the whole
    /// extraction is treated as failed and the run proceeds without charts.
    pub fn from_value(value: Value) -> Option<Self> {
        let obj = value.as_object()?;
        let list = |key: &str| -> Option<Vec<Value>> {
            Some(obj.get(key)?.as_array()?.to_vec())
        };
        Some(Self {
            pricing: list("pricing")?,
            features: list("features")?,
            risks: list("risks")?,
        })
    }
}

/// Terminal status of a run as seen by the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Processing,
    Completed,
    CompletedWithWarning,
    Failed,
}

/// Run submission parameters, as handed to the initial-state constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    pub company_name: String,
    pub competitors: Vec<String>,
    pub use_auto_discovery: bool,
    pub max_competitors: usize,
    pub freshness: Freshness,
    pub premium_analysis: bool,
}

impl RunRequest {
    pub fn new(query: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            company_name: company_name.into(),
            competitors: Vec::new(),
            use_auto_discovery: false,
            max_competitors: 5,
            freshness: Freshness::Anytime,
            premium_analysis: false,
        }
    }

    pub fn with_competitors(mut self, competitors: Vec<String>) -> Self {
        self.competitors = competitors;
        self
    }

    pub fn with_auto_discovery(mut self, max_competitors: usize) -> Self {
        self.use_auto_discovery = true;
        self.max_competitors = max_competitors;
        self
    }

    pub fn with_freshness(mut self, freshness: Freshness) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_premium_analysis(mut self, premium: bool) -> Self {
        self.premium_analysis = premium;
        self
    }
}

/// The state document threaded through the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    // Input fields, set once at initialization and never overwritten.
    pub query: String,
    pub company_name: String,
    pub freshness: Freshness,
    pub use_auto_discovery: bool,
    pub max_competitors: usize,
    pub started_at: DateTime<Utc>,

    // Stage outputs.
    pub competitors: Vec<String>,
    pub company_profile: Option<CompanyProfile>,
    pub research_results: Vec<ResearchResult>,
    pub extracted_data: Vec<ExtractedItem>,
    pub crawl_results: Vec<CrawlResult>,
    pub analysis: Option<String>,
    pub chart_data: Option<ChartData>,
    pub analysis_mode: Option<AnalysisMode>,

    // Workflow metadata.
    pub current_step: String,
    pub completed_agents: Vec<StageName>,
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Construct the initial state from a run request.
    pub fn initial(request: &RunRequest) -> Self {
        let now = Utc::now();
        Self {
            query: request.query.clone(),
            company_name: request.company_name.clone(),
            freshness: request.freshness,
            use_auto_discovery: request.use_auto_discovery,
            max_competitors: request.max_competitors,
            started_at: now,
            competitors: request.competitors.clone(),
            company_profile: None,
            research_results: Vec::new(),
            extracted_data: Vec::new(),
            crawl_results: Vec::new(),
            analysis: None,
            chart_data: None,
            analysis_mode: None,
            current_step: "initialized".to_string(),
            completed_agents: Vec::new(),
            errors: Vec::new(),
            updated_at: now,
        }
    }

    /// Whether a stage has already been folded into this state.
    pub fn has_completed(&self, stage: StageName) -> bool {
        self.completed_agents.contains(&stage)
    }

    /// Apply a single stage update, producing the successor snapshot.
    ///
    /// Pure with respect to `self`; input fields are untouched because no
    /// [`StageOutput`] variant can carry them.
    pub fn apply(&self, update: StageUpdate) -> Self {
        let mut next = self.clone();

        match update.output {
            StageOutput::Discovery { competitors, profile } => {
                // Last-write-wins, guarded against empty overwrites of
                // caller-supplied input.
                if !competitors.is_empty() {
                    next.competitors = competitors;
                }
                if profile.is_some() {
                    next.company_profile = profile;
                }
            }
            StageOutput::Research { results } => {
                next.research_results = results;
            }
            StageOutput::Extraction { items } => {
                next.extracted_data = items;
            }
            StageOutput::Crawl { results } => {
                next.crawl_results = results;
            }
            StageOutput::Analysis { narrative, charts, mode } => {
                next.analysis = narrative;
                next.chart_data = charts;
                next.analysis_mode = Some(mode);
            }
        }

        if !next.completed_agents.contains(&update.stage) {
            next.completed_agents.push(update.stage);
        }
        for error in update.errors {
            if !next.errors.contains(&error) {
                next.errors.push(error);
            }
        }
        next.current_step = update.current_step;
        next.updated_at = next.updated_at.max(update.updated_at);
        next
    }

    /// Apply updates from concurrent branches.
    ///
    /// Updates are sorted by the canonical stage order before folding, so the
    /// result is independent of which branch settled first.
    pub fn apply_all(&self, mut updates: Vec<StageUpdate>) -> Self {
        updates.sort_by_key(|u| u.stage);
        updates.into_iter().fold(self.clone(), |state, u| state.apply(u))
    }

    /// Replace the current step without touching any stage output.
    ///
    /// Used by the driver to stamp the join between fan-out branches.
    pub fn with_step(&self, step: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.current_step = step.into();
        next.updated_at = next.updated_at.max(Utc::now());
        next
    }

    /// Append an error, preserving dedup discipline.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        let mut next = self.clone();
        let error = error.into();
        if !next.errors.contains(&error) {
            next.errors.push(error);
        }
        next.updated_at = next.updated_at.max(Utc::now());
        next
    }
}

/// Fields a single stage may legally set, tagged by stage.
///
/// Each variant carries only the output fields that stage owns; input fields
/// have no variant, which is what makes the immutable-input reducer total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutput {
    Discovery {
        competitors: Vec<String>,
        profile: Option<CompanyProfile>,
    },
    Research {
        results: Vec<ResearchResult>,
    },
    Extraction {
        items: Vec<ExtractedItem>,
    },
    Crawl {
        results: Vec<CrawlResult>,
    },
    Analysis {
        narrative: Option<String>,
        charts: Option<ChartData>,
        mode: AnalysisMode,
    },
}

impl StageOutput {
    /// The stage this output belongs to.
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Discovery { .. } => StageName::Discovery,
            StageOutput::Research { .. } => StageName::Research,
            StageOutput::Extraction { .. } => StageName::Extraction,
            StageOutput::Crawl { .. } => StageName::Crawl,
            StageOutput::Analysis { .. } => StageName::Analysis,
        }
    }
}

/// Partial state returned by one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub stage: StageName,
    pub output: StageOutput,
    pub current_step: String,
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl StageUpdate {
    /// Create an update; the stage tag is derived from the output variant.
    pub fn new(output: StageOutput) -> Self {
        let stage = output.stage();
        Self {
            stage,
            output,
            current_step: format!("{}_complete", stage),
            errors: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = step.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Dedupe a list of names case-insensitively, preserving first-seen order.
pub(crate) fn dedup_preserving_order(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let key = name.to_lowercase();
        if seen.insert(key) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_state() -> WorkflowState {
        let request = RunRequest::new("pricing strategy", "Acme")
            .with_competitors(vec!["Alpha".into(), "Beta".into()]);
        WorkflowState::initial(&request)
    }

    fn research_update() -> StageUpdate {
        StageUpdate::new(StageOutput::Research {
            results: vec![ResearchResult::Success {
                competitor: "Alpha".into(),
                query: "Alpha pricing strategy".into(),
                summary: "Alpha sells widgets.".into(),
                hits: vec![],
                fetched_at: Utc::now(),
            }],
        })
    }

    fn extraction_update() -> StageUpdate {
        StageUpdate::new(StageOutput::Extraction {
            items: vec![ExtractedItem::Success {
                competitor: "Alpha".into(),
                url: "https://alpha.example/pricing".into(),
                title: "Pricing".into(),
                content: "plans".into(),
                content_length: 5,
                extracted_at: Utc::now(),
            }],
        })
        .with_error("extraction: one URL failed")
    }

    fn crawl_update() -> StageUpdate {
        StageUpdate::new(StageOutput::Crawl {
            results: vec![CrawlResult::Success {
                competitor: "Alpha".into(),
                start_url: "https://alpha.example/pricing".into(),
                focus: CrawlFocus::Pricing,
                pages_crawled: 2,
                urls: vec!["https://alpha.example/pricing".into()],
                combined_content: "a\n\n---PAGE BREAK---\n\nb".into(),
                content_length: 23,
                crawled_at: Utc::now(),
            }],
        })
        .with_error("crawl: one site failed")
    }

    #[test]
    fn merge_is_commutative_for_fanout_branches() {
        let base = base_state().apply(research_update());
        let extraction = extraction_update();
        let crawl = crawl_update();

        let ab = base.apply_all(vec![extraction.clone(), crawl.clone()]);
        let ba = base.apply_all(vec![crawl, extraction]);

        assert_eq!(ab, ba);
    }

    #[test]
    fn completed_agents_grows_monotonically_without_duplicates() {
        let mut state = base_state();
        for _ in 0..3 {
            state = state.apply(research_update());
        }
        state = state.apply_all(vec![extraction_update(), crawl_update()]);
        state = state.apply(extraction_update());

        assert_eq!(
            state.completed_agents,
            vec![StageName::Research, StageName::Extraction, StageName::Crawl]
        );
    }

    #[test]
    fn input_fields_survive_every_merge() {
        let initial = base_state();
        let state = initial
            .apply(research_update())
            .apply_all(vec![extraction_update(), crawl_update()])
            .with_step("gather_complete");

        assert_eq!(state.query, initial.query);
        assert_eq!(state.company_name, initial.company_name);
        assert_eq!(state.started_at, initial.started_at);
        assert_eq!(state.use_auto_discovery, initial.use_auto_discovery);
        assert_eq!(state.max_competitors, initial.max_competitors);
        assert_eq!(state.freshness, initial.freshness);
    }

    #[test]
    fn errors_union_never_drops_entries() {
        let base = base_state();
        let merged = base.apply_all(vec![extraction_update(), crawl_update()]);

        assert!(merged.errors.contains(&"extraction: one URL failed".to_string()));
        assert!(merged.errors.contains(&"crawl: one site failed".to_string()));
        assert_eq!(merged.errors.len(), 2);

        // Re-applying the same update must not duplicate its error.
        let again = merged.apply(crawl_update());
        assert_eq!(again.errors.len(), 2);
    }

    #[test]
    fn discovery_empty_output_does_not_blank_caller_competitors() {
        let base = base_state();
        let update = StageUpdate::new(StageOutput::Discovery {
            competitors: vec![],
            profile: None,
        })
        .with_error("Discovery error: no company name provided");

        let state = base.apply(update);
        assert_eq!(state.competitors, vec!["Alpha".to_string(), "Beta".to_string()]);
        assert!(state.has_completed(StageName::Discovery));
    }

    #[test]
    fn freshness_maps_to_days() {
        assert_eq!(Freshness::Anytime.days(), None);
        assert_eq!(Freshness::OneMonth.days(), Some(30));
        assert_eq!(Freshness::ThreeMonths.days(), Some(90));
        assert_eq!(Freshness::SixMonths.days(), Some(180));
        assert_eq!(Freshness::OneYear.days(), Some(365));
    }

    #[test]
    fn freshness_serde_names() {
        assert_eq!(serde_json::to_string(&Freshness::OneMonth).unwrap(), r#""1month""#);
        let parsed: Freshness = serde_json::from_str(r#""6months""#).unwrap();
        assert_eq!(parsed, Freshness::SixMonths);
    }

    #[test]
    fn chart_data_requires_three_lists() {
        let valid = json!({"pricing": [1], "features": [], "risks": [{"name": "churn"}]});
        assert!(ChartData::from_value(valid).is_some());

        let wrong_type = json!({"pricing": [1], "features": "not a list", "risks": []});
        assert!(ChartData::from_value(wrong_type).is_none());

        let missing_key = json!({"pricing": [1], "features": []});
        assert!(ChartData::from_value(missing_key).is_none());
    }

    #[test]
    fn research_record_serializes_with_status_tag() {
        let record = ResearchResult::Error {
            competitor: "Beta".into(),
            query: "Beta pricing".into(),
            error: "timeout".into(),
            fetched_at: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["competitor"], "Beta");
    }

    #[test]
    fn workflow_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::CompletedWithWarning).unwrap(),
            r#""completed-with-warning""#
        );
    }

    #[test]
    fn stage_update_derives_stage_and_step() {
        let update = research_update();
        assert_eq!(update.stage, StageName::Research);
        assert_eq!(update.current_step, "research_complete");
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let names = vec![
            "Square".to_string(),
            "Adyen".to_string(),
            "square".to_string(),
            "Braintree".to_string(),
        ];
        assert_eq!(
            dedup_preserving_order(names),
            vec!["Square".to_string(), "Adyen".to_string(), "Braintree".to_string()]
        );
    }
}
