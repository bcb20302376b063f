//! Domain records shared across the integration pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of repository text content, keyed by relative path.
pub type RepoContent = BTreeMap<String, String>;

fn default_confidence() -> u8 {
    50
}

/// A file the analysis stage expects to need changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffectedFile {
    pub path: String,
    #[serde(default)]
    pub reason: String,
    /// Confidence as a percentage. Float 0.0-1.0 inputs are scaled at the
    /// parser boundary; this field is always 0-100.
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Validated output of the analysis stage.
///
/// Every sequence field is present after validation; the parser fills
/// defaults rather than leaving fields absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub main_modules: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub affected_files: Vec<AffectedFile>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub implementation_steps: Vec<String>,
    /// Raw model output, kept for debuggability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// One file rewritten by the implementation stage. Never mutated after
/// creation; consumed by the diff engine and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    pub original_content: String,
    pub modified_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub changes_made: Vec<String>,
}

/// A failure tied to a single file during implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

/// Outcome of one implementation attempt across the whole snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationOutcome {
    pub success: bool,
    #[serde(default)]
    pub modified_files: Vec<ModifiedFile>,
    #[serde(default)]
    pub errors: Vec<FileError>,
    #[serde(default)]
    pub execution_logs: Vec<String>,
}

/// Where a research solution was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionSource {
    GitHub,
    StackOverflow,
    Reddit,
    Docs,
    Web,
}

impl std::fmt::Display for SolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SolutionSource::GitHub => "github",
            SolutionSource::StackOverflow => "stackoverflow",
            SolutionSource::Reddit => "reddit",
            SolutionSource::Docs => "docs",
            SolutionSource::Web => "web",
        };
        f.write_str(name)
    }
}

/// A candidate fix surfaced by the research stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub source: SolutionSource,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
    #[serde(default)]
    pub search_query: String,
}

/// Ranked research output. Advisory only; never aborts the retry flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchReport {
    #[serde(default)]
    pub solutions_found: Vec<Solution>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub search_queries_used: Vec<String>,
    #[serde(default)]
    pub total_sources: usize,
}

/// Unified diff for a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub diff_text: String,
    #[serde(default)]
    pub change_summary: Vec<String>,
}

/// Aggregate diff between two repository snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffReport {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
    #[serde(default)]
    pub file_diffs: Vec<FileDiff>,
    #[serde(default)]
    pub summary: String,
}

/// Offline smoke-check results from the testing stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckReport {
    pub passed: bool,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub failures: Vec<String>,
}

/// Final pipeline results, serialized as a mapping keyed by stage name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<ImplementationOutcome>,
    /// One report per research/retry cycle, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research: Vec<ResearchReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckReport>,
    /// Set when the run terminated through `report_failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_file_defaults_confidence_when_missing() {
        let file: AffectedFile = serde_json::from_str(r#"{"path": "a.py"}"#).unwrap();
        assert_eq!(file.confidence, 50);
        assert!(file.changes.is_empty());
    }

    #[test]
    fn analysis_report_sequences_default_to_empty() {
        let report: AnalysisReport = serde_json::from_str("{}").unwrap();
        assert!(report.main_modules.is_empty());
        assert!(report.dependencies.is_empty());
        assert!(report.affected_files.is_empty());
        assert!(report.risks.is_empty());
        assert!(report.implementation_steps.is_empty());
    }

    #[test]
    fn pipeline_results_serialize_keyed_by_stage_name() {
        let results = PipelineResults {
            analysis: Some(AnalysisReport::default()),
            diff: Some(DiffReport::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&results).unwrap();
        assert!(value.get("analysis").is_some());
        assert!(value.get("diff").is_some());
        assert!(value.get("implementation").is_none());
        assert!(value.get("failure").is_none());
    }

    #[test]
    fn solution_source_serializes_lowercase() {
        let json = serde_json::to_string(&SolutionSource::StackOverflow).unwrap();
        assert_eq!(json, r#""stackoverflow""#);
        assert_eq!(SolutionSource::GitHub.to_string(), "github");
    }
}
