//! Contracts between the pipeline core and its collaborators.

use crate::model::RepoContent;
use crate::state::AgentAction;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A cloned repository on local disk.
#[derive(Debug, Clone)]
pub struct ClonedRepo {
    pub local_path: PathBuf,
    pub owner: String,
    pub name: String,
}

/// Acquires repository content. The core only needs a path-to-text
/// mapping; cloning and caching strategy belong to the adapter.
pub trait RepositoryProvider: Send + Sync {
    fn clone_repository<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClonedRepo>>;

    /// Relative paths of source files under `root`, in a stable order.
    fn list_source_files(&self, root: &Path) -> Result<Vec<String>>;

    /// Read the given relative paths. Oversized or unreadable files are
    /// skipped with a logged warning, not errors.
    fn read_files(&self, root: &Path, paths: &[String]) -> Result<RepoContent>;
}

/// Answers validity and metadata questions about a remote repository.
pub trait MetadataProvider: Send + Sync {
    fn is_valid_url(&self, url: &str) -> bool;

    fn repo_info<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Option<serde_json::Value>>;

    fn validate<'a>(&'a self, owner: &'a str, name: &'a str) -> BoxFuture<'a, bool>;
}

/// Progress notifications streamed to the presentation layer while the
/// pipeline runs. Each completed stage is observable before the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    StageStarted {
        agent: AgentAction,
    },
    StageCompleted {
        agent: AgentAction,
        detail: String,
    },
    PipelineFinished {
        terminal: AgentAction,
    },
}
