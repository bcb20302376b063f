//! Drive loop for the integration pipeline.
//!
//! The orchestrator owns the state record, asks the pure transition
//! function which agent runs next, executes that stage, and records the
//! outcome. Research couples back into implementation through an
//! explicit instruction accumulator so every retry's effective prompt is
//! reconstructable from this loop alone.

use crate::diff;
use crate::llm::analysis::analyze_repository;
use crate::llm::client::CompletionModel;
use crate::llm::implementation::implement_changes;
use crate::llm::research::{best_fix_snippet, ResearchProvider};
use anyhow::Result;
use graft_adapters::util::{debug_log, truncate_str};
use graft_core::model::{
    CheckReport, ImplementationOutcome, PipelineResults, RepoContent,
};
use graft_core::protocol::Event;
use graft_core::state::{decide_next, AgentAction, OrchestratorState, Stage, MAX_RETRIES};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Research snippets are clipped before they join the instructions so
/// repeated retries cannot grow the prompt without bound.
const MAX_SNIPPET_CHARS: usize = 4_000;

pub struct Orchestrator<'a> {
    model: &'a dyn CompletionModel,
    research: &'a dyn ResearchProvider,
    state: OrchestratorState,
    run_id: Uuid,
    backup_root: Option<PathBuf>,
    progress: Option<UnboundedSender<Event>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(model: &'a dyn CompletionModel, research: &'a dyn ResearchProvider) -> Self {
        Self {
            model,
            research,
            state: OrchestratorState::new(),
            run_id: Uuid::new_v4(),
            backup_root: None,
            progress: None,
        }
    }

    /// Directory where originals are backed up before modification.
    pub fn with_backup_root(mut self, root: PathBuf) -> Self {
        self.backup_root = Some(root);
        self
    }

    /// Channel for streaming stage progress to a UI.
    pub fn with_progress(mut self, sender: UnboundedSender<Event>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Flip the approval gate. The pipeline will not advance past the
    /// initial stage until this is called.
    pub fn approve(&mut self) {
        self.state.approval_received = true;
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(event);
        }
    }

    /// Run stages to a terminal marker. Raises only on setup-level
    /// problems (a corrupted stage record, a failed analysis call);
    /// degraded model output travels inside the results instead.
    pub async fn run_pipeline(
        &mut self,
        repo_content: &RepoContent,
        instructions: &str,
    ) -> Result<PipelineResults> {
        let mut results = PipelineResults::default();
        // Research augments this accumulator; it is never rolled back.
        let mut effective_instructions = instructions.to_string();

        loop {
            let next = decide_next(&self.state);
            debug_log(&format!("run {}: next agent {}", self.run_id, next.name()));

            if next == AgentAction::WaitForApproval {
                // Halt; the caller must flip the approval flag and rerun.
                return Ok(results);
            }

            if next.is_terminal() {
                match next {
                    AgentAction::ReportFailure => {
                        let reason = self
                            .state
                            .last_error_message
                            .clone()
                            .unwrap_or_else(|| "unknown implementation error".to_string());
                        results.failure = Some(format!(
                            "Implementation failed after {} retries: {}",
                            MAX_RETRIES, reason
                        ));
                    }
                    AgentAction::Error => {
                        anyhow::bail!(
                            "orchestrator reached unrecognized stage {:?}",
                            self.state.current_stage
                        );
                    }
                    _ => {}
                }
                self.emit(Event::PipelineFinished { terminal: next });
                return Ok(results);
            }

            self.emit(Event::StageStarted { agent: next });
            let detail = self
                .run_stage(next, repo_content, &mut effective_instructions, &mut results)
                .await?;
            self.emit(Event::StageCompleted {
                agent: next,
                detail,
            });
        }
    }

    /// Execute one non-terminal stage, updating state and results.
    /// Returns the human-readable detail line for progress events.
    async fn run_stage(
        &mut self,
        agent: AgentAction,
        repo_content: &RepoContent,
        effective_instructions: &mut String,
        results: &mut PipelineResults,
    ) -> Result<String> {
        match agent {
            AgentAction::Analyze => {
                let report =
                    analyze_repository(self.model, repo_content, effective_instructions, None)
                        .await?;
                let detail = format!(
                    "{} files flagged, {} dependencies",
                    report.affected_files.len(),
                    report.dependencies.len()
                );
                results.analysis = Some(report);
                self.state.current_stage = Stage::AnalysisComplete;
                Ok(detail)
            }

            AgentAction::Implement => {
                let outcome = implement_changes(
                    self.model,
                    repo_content,
                    effective_instructions,
                    self.backup_root.as_deref(),
                )
                .await;
                let detail = if outcome.success {
                    format!("{} files modified", outcome.modified_files.len())
                } else {
                    format!("{} files failed", outcome.errors.len())
                };

                if outcome.success {
                    self.state.last_error_message = None;
                    self.state.current_stage = Stage::ImplementationComplete;
                } else {
                    self.state.last_error_message =
                        outcome.errors.first().map(|e| e.message.clone());
                    self.state.current_stage = Stage::ImplementationFailed;
                }
                results.implementation = Some(outcome);
                Ok(detail)
            }

            AgentAction::Research => {
                let error_message = self
                    .state
                    .last_error_message
                    .clone()
                    .unwrap_or_else(|| "implementation failed".to_string());
                let (failed_code, logs) = research_context(repo_content, results);

                let report = self
                    .research
                    .research(&error_message, &failed_code, &logs)
                    .await;
                let detail = format!("{} solutions found", report.total_sources);

                if let Some(snippet) = best_fix_snippet(&report) {
                    effective_instructions.push_str(&format!(
                        "\n\nA previous attempt failed with: {}\nApply this candidate fix found by research:\n{}",
                        error_message,
                        truncate_str(&snippet, MAX_SNIPPET_CHARS)
                    ));
                }
                results.research.push(report);

                // Retry counted before the attempt it unlocks.
                self.state.retry_count += 1;
                self.state.current_stage = Stage::RetryPending;
                Ok(detail)
            }

            AgentAction::Diff => {
                let modified_snapshot = apply_modifications(repo_content, results.implementation.as_ref());
                let report = diff::generate_diff(repo_content, &modified_snapshot);
                let detail = report.summary.clone();
                results.diff = Some(report);
                self.state.current_stage = Stage::DiffComplete;
                Ok(detail)
            }

            AgentAction::Summarize => {
                let summary = build_summary(results);
                results.summary = Some(summary.clone());
                self.state.current_stage = Stage::SummaryComplete;
                Ok(summary)
            }

            AgentAction::Test => {
                let report = run_smoke_checks(results.implementation.as_ref());
                let detail = if report.passed {
                    format!("{} checks passed", report.checks.len())
                } else {
                    format!("{} checks failed", report.failures.len())
                };
                results.checks = Some(report);
                self.state.current_stage = Stage::TestingComplete;
                Ok(detail)
            }

            // Terminal actions and the approval gate are handled by the
            // drive loop before this point.
            _ => anyhow::bail!("agent {} is not an executable stage", agent.name()),
        }
    }
}

/// Context handed to the research stage: the first failing file's
/// content and the implementation log tail.
fn research_context(
    repo_content: &RepoContent,
    results: &PipelineResults,
) -> (String, Vec<String>) {
    let Some(outcome) = results.implementation.as_ref() else {
        return (String::new(), Vec::new());
    };

    let failed_code = outcome
        .errors
        .iter()
        .find_map(|e| e.file_path.as_ref())
        .and_then(|path| repo_content.get(path))
        .cloned()
        .unwrap_or_default();

    (failed_code, outcome.execution_logs.clone())
}

/// Overlay recorded modifications onto the base snapshot.
fn apply_modifications(
    base: &RepoContent,
    outcome: Option<&ImplementationOutcome>,
) -> RepoContent {
    let mut snapshot = base.clone();
    if let Some(outcome) = outcome {
        for file in &outcome.modified_files {
            snapshot.insert(file.path.clone(), file.modified_content.clone());
        }
    }
    snapshot
}

/// Deterministic digest of the run, composed from the recorded stages.
fn build_summary(results: &PipelineResults) -> String {
    let diff_summary = results
        .diff
        .as_ref()
        .map(|d| d.summary.clone())
        .unwrap_or_else(|| "no diff recorded".to_string());

    let (flagged, deps, risks) = results
        .analysis
        .as_ref()
        .map(|a| (a.affected_files.len(), a.dependencies.len(), a.risks.len()))
        .unwrap_or((0, 0, 0));

    let modified = results
        .implementation
        .as_ref()
        .map(|i| i.modified_files.len())
        .unwrap_or(0);
    let retries = results.research.len();

    format!(
        "{}. Analysis flagged {} files and {} dependencies with {} risks. \
         Implementation modified {} files after {} research cycle(s).",
        diff_summary, flagged, deps, risks, modified, retries
    )
}

/// Offline smoke checks over the modified files: content present and
/// bracket delimiters balanced outside string literals.
fn run_smoke_checks(outcome: Option<&ImplementationOutcome>) -> CheckReport {
    let mut report = CheckReport {
        passed: true,
        ..Default::default()
    };

    let Some(outcome) = outcome.filter(|o| !o.modified_files.is_empty()) else {
        report.checks.push("No modified files to check.".to_string());
        return report;
    };

    for file in &outcome.modified_files {
        if file.modified_content.trim().is_empty() {
            report
                .failures
                .push(format!("File '{}': generated content is empty.", file.path));
            continue;
        }
        if !delimiters_balanced(&file.modified_content) {
            report.failures.push(format!(
                "File '{}': unbalanced brackets in generated content.",
                file.path
            ));
            continue;
        }
        report
            .checks
            .push(format!("File '{}': content checks passed.", file.path));
    }

    report.passed = report.failures.is_empty();
    report
}

/// Rough bracket balance scan that ignores quoted spans.
fn delimiters_balanced(content: &str) -> bool {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in content.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.pop() != Some(ch) {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty()
}
