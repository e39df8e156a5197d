//! Prompt templates for the LLM-backed stages.

/// System prompt for extracting a company profile during discovery.
pub fn company_profile_system() -> String {
    "You are a market research assistant. Given a company name, describe its \
     business in strict JSON with exactly these keys: primary_business, \
     target_customer, value_proposition, market_segment, search_terms. \
     search_terms is a list of 3-5 short phrases for finding competitors. \
     Respond with JSON only."
        .to_string()
}

pub fn company_profile_user(company: &str) -> String {
    format!("Company: {company}")
}

/// System prompt for filtering search hits down to real competitor names.
pub fn competitor_filter_system(company: &str, profile_summary: &str) -> String {
    format!(
        "You identify direct competitors of {company}. Their business: \
         {profile_summary}. From the search results you are given, return a \
         JSON object with a single key \"competitors\" holding a list of \
         company names that directly compete with {company}. Only include \
         actual companies, never products, articles, or generic terms. \
         Respond with JSON only."
    )
}

pub fn competitor_filter_user(results_block: &str) -> String {
    format!("Search results:\n{results_block}")
}

/// Fallback prompt when searches yield too few competitors.
pub fn known_competitors_system() -> String {
    "You are a market research assistant with broad knowledge of companies. \
     Return a JSON object with a single key \"competitors\" holding a list \
     of well-known direct competitors of the given company. Respond with \
     JSON only."
        .to_string()
}

pub fn known_competitors_user(company: &str, count: usize) -> String {
    format!("List up to {count} direct competitors of {company}.")
}

/// System prompt for the analysis narrative.
pub fn analysis_system(company: &str) -> String {
    format!(
        "You are a senior competitive intelligence analyst advising {company}. \
         Write a thorough markdown report with these sections:\n\
         1. Executive Summary\n\
         2. Pricing Comparison\n\
         3. Feature Comparison\n\
         4. Market Positioning\n\
         5. Risk Assessment (for each risk give impact, likelihood, \
         mitigation, and timeline)\n\
         6. Additional Insights (only if the research supports them)\n\
         7. Strategic Recommendations\n\
         Ground every claim in the provided research context. Note where the \
         data is thin instead of inventing specifics."
    )
}

pub fn analysis_user(query: &str, company: &str, competitors: &[String], context: &str) -> String {
    format!(
        "Research question: {query}\n\
         Company: {company}\n\
         Competitors analyzed: {}\n\n\
         Research context:\n{context}",
        competitors.join(", ")
    )
}

/// System prompt for turning a narrative into chart-ready JSON.
pub fn chart_extraction_system() -> String {
    "Extract structured data from the competitive analysis report you are \
     given. Return a JSON object with exactly three keys, each a list:\n\
     - pricing: objects with competitor, plan, price (monthly USD number or \
     null), notes\n\
     - features: objects with feature, then one boolean or short-string key \
     per competitor\n\
     - risks: objects with risk, impact (1-5), likelihood (1-5)\n\
     Use only facts stated in the report. Respond with JSON only."
        .to_string()
}

pub fn chart_extraction_user(narrative: &str) -> String {
    format!("Report:\n{narrative}")
}
