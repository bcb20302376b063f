//! Orchestrator state record and the pure stage-transition function.
//!
//! The transition table is deliberately a closed enum: every reachable
//! stage maps to exactly one next agent, and the `Unknown` variant exists
//! only so state loaded from storage can carry a corrupted marker that
//! resolves to the `error` terminal instead of panicking.

use serde::{Deserialize, Serialize};

/// Maximum research/retry cycles before the run reports failure.
pub const MAX_RETRIES: u32 = 3;

/// Stage-completion markers recorded after each pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    AnalysisComplete,
    ImplementationComplete,
    ImplementationFailed,
    /// Set by research completion; routes back into implementation.
    RetryPending,
    DiffComplete,
    SummaryComplete,
    TestingComplete,
    /// Safety net for state deserialized from storage with a marker this
    /// build does not recognize.
    #[serde(other)]
    Unknown,
}

/// Mutable state owned exclusively by the orchestrator for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub approval_received: bool,
    pub current_stage: Stage,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self {
            approval_received: false,
            current_stage: Stage::Init,
            retry_count: 0,
            last_error_message: None,
        }
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}

/// The next agent the drive loop should run, as decided from the state.
///
/// Serialized names match `name()` so events and stored results agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentAction {
    #[serde(rename = "wait_for_approval")]
    WaitForApproval,
    #[serde(rename = "analyzer_agent")]
    Analyze,
    #[serde(rename = "implementation_agent")]
    Implement,
    #[serde(rename = "research_agent")]
    Research,
    #[serde(rename = "diff_agent")]
    Diff,
    #[serde(rename = "summary_agent")]
    Summarize,
    #[serde(rename = "testing_agent")]
    Test,
    #[serde(rename = "report_failure")]
    ReportFailure,
    #[serde(rename = "finalize")]
    Finalize,
    #[serde(rename = "error")]
    Error,
}

impl AgentAction {
    /// Wire/display name for results keys and progress events.
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::WaitForApproval => "wait_for_approval",
            AgentAction::Analyze => "analyzer_agent",
            AgentAction::Implement => "implementation_agent",
            AgentAction::Research => "research_agent",
            AgentAction::Diff => "diff_agent",
            AgentAction::Summarize => "summary_agent",
            AgentAction::Test => "testing_agent",
            AgentAction::ReportFailure => "report_failure",
            AgentAction::Finalize => "finalize",
            AgentAction::Error => "error",
        }
    }

    /// Terminal actions stop the drive loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentAction::ReportFailure | AgentAction::Finalize | AgentAction::Error
        )
    }
}

/// Decide which agent runs next. Pure function of the state record.
pub fn decide_next(state: &OrchestratorState) -> AgentAction {
    if !state.approval_received {
        return AgentAction::WaitForApproval;
    }

    match state.current_stage {
        Stage::Init => AgentAction::Analyze,
        Stage::AnalysisComplete => AgentAction::Implement,
        Stage::ImplementationFailed => {
            if state.retry_count < MAX_RETRIES {
                AgentAction::Research
            } else {
                AgentAction::ReportFailure
            }
        }
        Stage::RetryPending => AgentAction::Implement,
        Stage::ImplementationComplete => AgentAction::Diff,
        Stage::DiffComplete => AgentAction::Summarize,
        Stage::SummaryComplete => AgentAction::Test,
        Stage::TestingComplete => AgentAction::Finalize,
        Stage::Unknown => AgentAction::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(approved: bool, stage: Stage, retries: u32) -> OrchestratorState {
        OrchestratorState {
            approval_received: approved,
            current_stage: stage,
            retry_count: retries,
            last_error_message: None,
        }
    }

    #[test]
    fn transition_table_is_exhaustive() {
        let cases = [
            (state(false, Stage::Init, 0), AgentAction::WaitForApproval),
            (state(true, Stage::Init, 0), AgentAction::Analyze),
            (
                state(true, Stage::AnalysisComplete, 0),
                AgentAction::Implement,
            ),
            (
                state(true, Stage::ImplementationFailed, 2),
                AgentAction::Research,
            ),
            (
                state(true, Stage::ImplementationFailed, 3),
                AgentAction::ReportFailure,
            ),
            (state(true, Stage::RetryPending, 1), AgentAction::Implement),
            (
                state(true, Stage::ImplementationComplete, 0),
                AgentAction::Diff,
            ),
            (state(true, Stage::DiffComplete, 0), AgentAction::Summarize),
            (state(true, Stage::SummaryComplete, 0), AgentAction::Test),
            (
                state(true, Stage::TestingComplete, 0),
                AgentAction::Finalize,
            ),
            (state(true, Stage::Unknown, 0), AgentAction::Error),
        ];

        for (state, expected) in cases {
            assert_eq!(decide_next(&state), expected, "state: {:?}", state);
        }
    }

    #[test]
    fn approval_gate_applies_to_every_stage() {
        for stage in [
            Stage::Init,
            Stage::AnalysisComplete,
            Stage::ImplementationFailed,
            Stage::TestingComplete,
        ] {
            assert_eq!(
                decide_next(&state(false, stage, 0)),
                AgentAction::WaitForApproval
            );
        }
    }

    #[test]
    fn retry_boundary_is_exactly_max_retries() {
        assert_eq!(
            decide_next(&state(true, Stage::ImplementationFailed, MAX_RETRIES - 1)),
            AgentAction::Research
        );
        assert_eq!(
            decide_next(&state(true, Stage::ImplementationFailed, MAX_RETRIES)),
            AgentAction::ReportFailure
        );
        assert_eq!(
            decide_next(&state(true, Stage::ImplementationFailed, MAX_RETRIES + 5)),
            AgentAction::ReportFailure
        );
    }

    #[test]
    fn unrecognized_persisted_stage_maps_to_error() {
        let json = r#"{"approval_received": true, "current_stage": "shipping_complete", "retry_count": 0}"#;
        let state: OrchestratorState = serde_json::from_str(json).unwrap();
        assert_eq!(state.current_stage, Stage::Unknown);
        assert_eq!(decide_next(&state), AgentAction::Error);
    }

    #[test]
    fn agent_names_match_wire_format() {
        assert_eq!(AgentAction::Analyze.name(), "analyzer_agent");
        assert_eq!(AgentAction::Research.name(), "research_agent");
        assert_eq!(AgentAction::ReportFailure.name(), "report_failure");
        assert!(AgentAction::Finalize.is_terminal());
        assert!(AgentAction::Error.is_terminal());
        assert!(!AgentAction::Implement.is_terminal());
    }
}
