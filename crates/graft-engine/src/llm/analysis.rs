//! Analysis stage: select a bounded subset of repository files, ask the
//! model for a structured integration analysis, and recover a report
//! through the tolerant parser.

use super::client::{CompletionModel, GenerateRequest};
use super::parse::parse_analysis_response;
use super::prompts::{analysis_prompt, analysis_prompt_plain};
use anyhow::{Context, Result};
use graft_adapters::util::debug_log;
use graft_core::model::{AnalysisReport, RepoContent};

/// How many files are embedded into the analysis prompt.
pub(crate) const DEFAULT_FILE_LIMIT: usize = 5;

const ANALYSIS_MAX_TOKENS: u32 = 2_000;

/// Filename fragments that mark likely-important files.
const PRIORITY_PATTERNS: [&str; 7] = [
    "main.py",
    "app.py",
    "__init__.py",
    "core",
    "api",
    "model",
    "agent",
];

/// Score a file for prompt inclusion: name patterns win, medium-sized
/// files get a bonus, huge files and tests are penalized.
fn relevance_score(path: &str, content: &str) -> i32 {
    let lowered = path.to_lowercase();
    let mut score = 0;

    for pattern in PRIORITY_PATTERNS {
        if lowered.contains(pattern) {
            score += 10;
        }
    }

    let size = content.len();
    if size > 500 && size < 5_000 {
        score += 5;
    } else if size > 10_000 {
        score -= 3;
    }

    if lowered.contains("test") {
        score -= 10;
    }

    score
}

/// Select the most relevant files, keeping the prompt bounded.
pub fn select_relevant_files(repo_content: &RepoContent, limit: usize) -> RepoContent {
    let mut scored: Vec<(i32, &String, &String)> = repo_content
        .iter()
        .map(|(path, content)| (relevance_score(path, content), path, content))
        .collect();

    // Descending by score; path order breaks ties deterministically.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    scored
        .into_iter()
        .take(limit)
        .map(|(_, path, content)| (path.clone(), content.clone()))
        .collect()
}

/// Run the analysis stage. Model-call failure is a hard stage failure; a
/// silently-empty analysis would mislead the caller about what was
/// actually analyzed.
pub async fn analyze_repository(
    client: &dyn CompletionModel,
    repo_content: &RepoContent,
    instructions: &str,
    target_context: Option<&str>,
) -> Result<AnalysisReport> {
    let relevant = select_relevant_files(repo_content, DEFAULT_FILE_LIMIT);
    debug_log(&format!(
        "analysis over {} of {} files",
        relevant.len(),
        repo_content.len()
    ));

    let primary = analysis_prompt(instructions, &relevant, target_context);
    let fallback = analysis_prompt_plain(instructions, &relevant, target_context);

    let request = GenerateRequest::new(primary)
        .with_fallback(fallback)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

    let response = client
        .generate(request)
        .await
        .context("analysis model call failed")?;

    let mut report = parse_analysis_response(&response.text);
    report.raw_response = Some(response.text);

    debug_log(&format!(
        "analysis complete: {} files, {} deps",
        report.affected_files.len(),
        report.dependencies.len()
    ));

    Ok(report)
}
