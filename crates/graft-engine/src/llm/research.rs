//! Research stage: on implementation failure, ask a grounded-search
//! model for candidate fixes and rank them by confidence.
//!
//! Research is advisory. Every failure path inside this module degrades
//! to an empty-solutions report with generic recommendations; nothing
//! here may abort the parent retry flow.

use super::prompts::research_prompt;
use anyhow::{Context, Result};
use graft_adapters::config::Config;
use graft_adapters::util::{debug_log, truncate_str};
use graft_core::model::{ResearchReport, Solution, SolutionSource};
use graft_core::protocol::BoxFuture;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

const SEARCH_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const SEARCH_MODEL: &str = "gemini-2.0-flash";
const SEARCH_TIMEOUT_SECS: u64 = 120;

/// How many top solutions feed the recommendation list.
const MAX_RECOMMENDED_SOLUTIONS: usize = 5;

/// Seam over the research backend for orchestrator tests.
pub trait ResearchProvider: Send + Sync {
    /// Never fails; a degraded report is still a report.
    fn research<'a>(
        &'a self,
        error_message: &'a str,
        failed_code: &'a str,
        logs: &'a [String],
    ) -> BoxFuture<'a, ResearchReport>;
}

/// Classify a source URL and assign the heuristic confidence score.
/// GitHub issue links score highest, then other GitHub pages, then
/// StackOverflow, documentation hosts, Reddit, and finally the open web.
fn classify_source(url: &str) -> (SolutionSource, f32) {
    let lowered = url.to_lowercase();
    if lowered.contains("github.com") {
        if lowered.contains("/issues") {
            return (SolutionSource::GitHub, 0.95);
        }
        return (SolutionSource::GitHub, 0.85);
    }
    if lowered.contains("stackoverflow.com") {
        return (SolutionSource::StackOverflow, 0.8);
    }
    if lowered.contains("reddit.com") {
        return (SolutionSource::Reddit, 0.6);
    }
    if lowered.contains("docs.") || lowered.contains("readthedocs") || lowered.contains("/docs/") {
        return (SolutionSource::Docs, 0.7);
    }
    (SolutionSource::Web, 0.5)
}

fn extract_urls(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"https?://[^\s<>"'\)\]]+"#) else {
        return Vec::new();
    };
    let mut urls = Vec::new();
    for m in re.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',']).to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// Pull explicit search-query markers out of the response body.
fn extract_search_queries(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(?im)^\s*(?:[-*]\s+)?(?:search\s+query|query)\s*[:=]\s*"?([^"\n]+)"?\s*$"#)
    else {
        return Vec::new();
    };
    let mut queries = Vec::new();
    for capture in re.captures_iter(text) {
        let query = capture[1].trim().to_string();
        if !query.is_empty() && !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

fn extract_first_code_block(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```").ok()?;
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Human-readable advice derived from the ranked solutions.
fn generate_recommendations(solutions: &[Solution], error_message: &str) -> Vec<String> {
    if solutions.is_empty() {
        return vec![
            "No concrete solutions were found automatically.".to_string(),
            format!("Try searching manually for the error: {}", error_message),
        ];
    }

    let mut recommendations: Vec<String> = solutions
        .iter()
        .take(MAX_RECOMMENDED_SOLUTIONS)
        .map(|solution| {
            let title = if solution.title.is_empty() {
                solution.source.to_string()
            } else {
                solution.title.clone()
            };
            format!(
                "Review solution '{}' from {} ({}) and adapt it to the failing code.",
                title, solution.source, solution.url
            )
        })
        .collect();

    recommendations.push(
        "Apply the highest-confidence solution and rerun to verify the integration is fixed."
            .to_string(),
    );
    recommendations
}

/// Best candidate snippet across the report: the max-confidence
/// solution's code, its description when no code was extracted, or None.
pub fn best_fix_snippet(report: &ResearchReport) -> Option<String> {
    let best = report
        .solutions_found
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
    if let Some(snippet) = best
        .code_snippet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(snippet.to_string());
    }
    if best.description.trim().is_empty() {
        None
    } else {
        Some(best.description.clone())
    }
}

/// Grounded-search research agent.
///
/// Construction is cheap and never fails; credentials are checked on
/// first use via `ensure_ready`, so building the pipeline without a
/// search key configured is fine as long as research never runs.
pub struct ResearchAgent {
    api_key: Option<String>,
    endpoint: String,
    http: OnceLock<reqwest::Client>,
}

impl ResearchAgent {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.get_search_api_key(),
            endpoint: SEARCH_ENDPOINT.to_string(),
            http: OnceLock::new(),
        }
    }

    pub fn new(api_key: Option<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: OnceLock::new(),
        }
    }

    /// Two-phase lifecycle guard: returns the lazily-built client and
    /// key, failing only when research is actually invoked without
    /// credentials.
    fn ensure_ready(&self) -> Result<(&reqwest::Client, &str)> {
        let api_key = self
            .api_key
            .as_deref()
            .context("search API key not configured")?;
        let client = self.http.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default()
        });
        Ok((client, api_key))
    }

    async fn run(
        &self,
        error_message: &str,
        failed_code: &str,
        logs: &[String],
    ) -> Result<ResearchReport> {
        let (http, api_key) = self.ensure_ready()?;

        let prompt = research_prompt(error_message, failed_code, logs);
        let payload = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "tools": [{"google_search": {}}],
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint, SEARCH_MODEL
        );
        let response = http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .context("grounded search request failed")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("grounded search returned an unreadable body")?;
        if !status.is_success() {
            anyhow::bail!(
                "grounded search returned {}: {}",
                status,
                truncate_str(&body.to_string(), 200)
            );
        }

        Ok(self.parse_grounded_response(&body, error_message))
    }

    /// Build the report from a grounded response: structured citations
    /// first, bare-URL text mining as the fallback layer.
    fn parse_grounded_response(&self, body: &Value, error_message: &str) -> ResearchReport {
        let candidate = &body["candidates"][0];

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let mut solutions = Vec::new();

        if let Some(chunks) = candidate["groundingMetadata"]["groundingChunks"].as_array() {
            for chunk in chunks {
                let Some(uri) = chunk["web"]["uri"].as_str() else {
                    continue;
                };
                let (source, confidence) = classify_source(uri);
                solutions.push(Solution {
                    source,
                    url: uri.to_string(),
                    title: chunk["web"]["title"].as_str().unwrap_or("").to_string(),
                    description: truncate_str(&text, 300),
                    code_snippet: None,
                    confidence,
                    search_query: String::new(),
                });
            }
        }

        // Text fallback: no structured grounding, mine the body itself.
        if solutions.is_empty() {
            for url in extract_urls(&text) {
                let (source, confidence) = classify_source(&url);
                solutions.push(Solution {
                    source,
                    url,
                    title: String::new(),
                    description: truncate_str(&text, 300),
                    code_snippet: None,
                    confidence,
                    search_query: String::new(),
                });
            }
        }

        let mut search_queries: Vec<String> = candidate["groundingMetadata"]["webSearchQueries"]
            .as_array()
            .map(|queries| {
                queries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if search_queries.is_empty() {
            search_queries = extract_search_queries(&text);
        }
        for solution in &mut solutions {
            if let Some(first) = search_queries.first() {
                solution.search_query = first.clone();
            }
        }

        // Attach the response's first code block to the best candidate.
        if let Some(snippet) = extract_first_code_block(&text) {
            if let Some(best) = solutions
                .iter_mut()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            {
                best.code_snippet = Some(snippet);
            }
        }

        let recommendations = generate_recommendations(&solutions, error_message);
        let total_sources = solutions.len();

        ResearchReport {
            solutions_found: solutions,
            recommendations,
            search_queries_used: search_queries,
            total_sources,
        }
    }

    fn degraded_report(&self, error_message: &str) -> ResearchReport {
        ResearchReport {
            solutions_found: Vec::new(),
            recommendations: generate_recommendations(&[], error_message),
            search_queries_used: Vec::new(),
            total_sources: 0,
        }
    }
}

impl ResearchProvider for ResearchAgent {
    fn research<'a>(
        &'a self,
        error_message: &'a str,
        failed_code: &'a str,
        logs: &'a [String],
    ) -> BoxFuture<'a, ResearchReport> {
        Box::pin(async move {
            match self.run(error_message, failed_code, logs).await {
                Ok(report) => report,
                Err(err) => {
                    debug_log(&format!("research degraded: {}", err));
                    self.degraded_report(error_message)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_issues_score_highest() {
        let (source, score) = classify_source("https://github.com/org/repo/issues/42");
        assert_eq!(source, SolutionSource::GitHub);
        assert!(score > 0.9);

        let (_, repo_score) = classify_source("https://github.com/org/repo");
        assert!(repo_score < score);

        let (so, so_score) = classify_source("https://stackoverflow.com/questions/1");
        assert_eq!(so, SolutionSource::StackOverflow);
        assert!(so_score < repo_score);

        let (reddit, reddit_score) = classify_source("https://www.reddit.com/r/rust/x");
        assert_eq!(reddit, SolutionSource::Reddit);
        assert!(reddit_score < so_score);

        let (web, web_score) = classify_source("https://example.com/blog");
        assert_eq!(web, SolutionSource::Web);
        assert!(web_score < reddit_score);
    }

    #[test]
    fn docs_hosts_are_classified() {
        assert_eq!(
            classify_source("https://docs.python.org/3/library/asyncio.html").0,
            SolutionSource::Docs
        );
        assert_eq!(
            classify_source("https://fastapi.readthedocs.io/en/latest/").0,
            SolutionSource::Docs
        );
    }

    #[test]
    fn url_extraction_dedupes_and_trims_punctuation() {
        let text = "See https://github.com/a/b/issues/1, and https://example.com/x. \
                    Again: https://github.com/a/b/issues/1";
        let urls = extract_urls(text);
        assert_eq!(
            urls,
            vec![
                "https://github.com/a/b/issues/1",
                "https://example.com/x"
            ]
        );
    }

    #[test]
    fn search_query_markers_are_extracted() {
        let text = "## Search Queries Used\n- search query: python asyncio import error\nquery: fastapi lifespan";
        let queries = extract_search_queries(text);
        assert_eq!(
            queries,
            vec!["python asyncio import error", "fastapi lifespan"]
        );
    }

    #[test]
    fn best_fix_prefers_snippet_over_description() {
        let report = ResearchReport {
            solutions_found: vec![
                Solution {
                    source: SolutionSource::Web,
                    url: "https://example.com".to_string(),
                    title: String::new(),
                    description: "low confidence".to_string(),
                    code_snippet: Some("bad()".to_string()),
                    confidence: 0.4,
                    search_query: String::new(),
                },
                Solution {
                    source: SolutionSource::GitHub,
                    url: "https://github.com/a/b/issues/1".to_string(),
                    title: "fix".to_string(),
                    description: "use the new API".to_string(),
                    code_snippet: Some("good()".to_string()),
                    confidence: 0.95,
                    search_query: String::new(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(best_fix_snippet(&report).as_deref(), Some("good()"));
    }

    #[test]
    fn best_fix_falls_back_to_description_then_none() {
        let mut report = ResearchReport {
            solutions_found: vec![Solution {
                source: SolutionSource::Web,
                url: "https://example.com".to_string(),
                title: String::new(),
                description: "rewrite the import".to_string(),
                code_snippet: None,
                confidence: 0.5,
                search_query: String::new(),
            }],
            ..Default::default()
        };
        assert_eq!(
            best_fix_snippet(&report).as_deref(),
            Some("rewrite the import")
        );

        report.solutions_found.clear();
        assert!(best_fix_snippet(&report).is_none());
    }

    #[test]
    fn recommendations_for_empty_solutions_are_generic() {
        let recs = generate_recommendations(&[], "ImportError: x");
        assert_eq!(recs.len(), 2);
        assert!(recs[1].contains("ImportError: x"));
    }

    #[tokio::test]
    async fn missing_credentials_degrade_instead_of_failing() {
        // Construction without credentials must not fail; only invoking
        // research falls back to the degraded report.
        let agent = ResearchAgent::new(None, SEARCH_ENDPOINT);
        let report = agent.research("boom", "code", &[]).await;
        assert!(report.solutions_found.is_empty());
        assert_eq!(report.total_sources, 0);
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn grounded_chunks_become_ranked_solutions() {
        let agent = ResearchAgent::new(Some("key".to_string()), SEARCH_ENDPOINT);
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Fix:\n```python\nimport y\n```\nsee links"}]},
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://example.com/blog", "title": "a blog"}},
                        {"web": {"uri": "https://github.com/a/b/issues/9", "title": "the issue"}}
                    ],
                    "webSearchQueries": ["import error y"]
                }
            }]
        });
        let report = agent.parse_grounded_response(&body, "ImportError");
        assert_eq!(report.total_sources, 2);
        assert_eq!(report.search_queries_used, vec!["import error y"]);

        let best = report
            .solutions_found
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .unwrap();
        assert_eq!(best.url, "https://github.com/a/b/issues/9");
        assert_eq!(best.code_snippet.as_deref(), Some("import y"));
        // Recommendations name the sources.
        assert!(report.recommendations.iter().any(|r| r.contains("github")));
    }

    #[test]
    fn text_fallback_mines_bare_urls() {
        let agent = ResearchAgent::new(Some("key".to_string()), SEARCH_ENDPOINT);
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Check https://stackoverflow.com/q/1 for details."}]}
            }]
        });
        let report = agent.parse_grounded_response(&body, "boom");
        assert_eq!(report.total_sources, 1);
        assert_eq!(
            report.solutions_found[0].source,
            SolutionSource::StackOverflow
        );
    }
}
