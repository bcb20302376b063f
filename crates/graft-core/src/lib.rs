//! Core domain model and contracts for Graft.

pub mod model;
pub mod protocol;
pub mod state;

pub use protocol::*;
pub use state::{decide_next, AgentAction, OrchestratorState, Stage, MAX_RETRIES};
