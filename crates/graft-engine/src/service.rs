//! Integration service: the validate → clone → read → pipeline flow the
//! presentation layer calls into.

use crate::llm::client::ModelClient;
use crate::llm::research::ResearchAgent;
use crate::orchestrator::Orchestrator;
use anyhow::{Context, Result};
use chrono::Utc;
use graft_adapters::config::{Config, RunOptions};
use graft_adapters::github;
use graft_adapters::util::debug_log;
use graft_core::model::{AnalysisReport, PipelineResults};
use graft_core::protocol::{Event, MetadataProvider, RepositoryProvider};
use tokio::sync::mpsc::UnboundedSender;

pub struct IntegrationService<R, M>
where
    R: RepositoryProvider,
    M: MetadataProvider,
{
    repo: R,
    meta: M,
    config: Config,
}

impl<R, M> IntegrationService<R, M>
where
    R: RepositoryProvider,
    M: MetadataProvider,
{
    pub fn new(repo: R, meta: M, config: Config) -> Self {
        Self { repo, meta, config }
    }

    /// Quick check that the repository URL is well-formed and reachable.
    pub async fn validate(&self, url: &str) -> bool {
        if !self.meta.is_valid_url(url) {
            return false;
        }
        let Some((owner, name)) = github::parse_repo_url(url) else {
            return false;
        };
        self.meta.validate(&owner, &name).await
    }

    /// Repository metadata without cloning, for display before a run.
    pub async fn repository_info(&self, url: &str) -> Option<serde_json::Value> {
        let (owner, name) = github::parse_repo_url(url)?;
        self.meta.repo_info(&owner, &name).await
    }

    /// Run the full pipeline against a repository URL.
    ///
    /// The caller is responsible for having collected user approval; this
    /// entry point approves the orchestrator before driving it. Raises on
    /// setup problems (invalid URL, missing credentials); model-quality
    /// degradation travels inside the results.
    pub async fn run(
        &self,
        url: &str,
        instructions: &str,
        progress: Option<UnboundedSender<Event>>,
    ) -> Result<PipelineResults> {
        if !self.meta.is_valid_url(url) {
            anyhow::bail!("Invalid repository URL: {}", url);
        }

        let cloned = self.repo.clone_repository(url).await?;
        debug_log(&format!(
            "cloned {}/{} to {}",
            cloned.owner,
            cloned.name,
            cloned.local_path.display()
        ));

        let options = RunOptions::load(&cloned.local_path);

        let files = self.repo.list_source_files(&cloned.local_path)?;
        if files.is_empty() {
            // Nothing to analyze is a degraded result, not an error.
            return Ok(PipelineResults {
                analysis: Some(AnalysisReport {
                    risks: vec!["No source files found".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        let selected: Vec<String> = files.into_iter().take(options.max_files).collect();
        let content = self.repo.read_files(&cloned.local_path, &selected)?;
        debug_log(&format!("read {} files for the pipeline", content.len()));

        let client = match options.monthly_quota {
            Some(quota) => {
                let api_key = self
                    .config
                    .get_api_key()
                    .context("completion API key not set")?;
                let studio_url = self
                    .config
                    .get_studio_url()
                    .context("studio URL not set")?;
                ModelClient::new(studio_url, api_key, quota)?
            }
            None => ModelClient::from_config(&self.config)?,
        };
        let research = ResearchAgent::from_config(&self.config);

        let backup_root = cloned
            .local_path
            .join(".graft-backups")
            .join(Utc::now().format("%Y%m%d-%H%M%S").to_string());

        let mut orchestrator =
            Orchestrator::new(&client, &research).with_backup_root(backup_root);
        if let Some(sender) = progress {
            orchestrator = orchestrator.with_progress(sender);
        }
        orchestrator.approve();

        orchestrator.run_pipeline(&content, instructions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::model::RepoContent;
    use graft_core::protocol::{BoxFuture, ClonedRepo};
    use std::path::{Path, PathBuf};

    struct StubRepo {
        files: Vec<String>,
    }

    impl RepositoryProvider for StubRepo {
        fn clone_repository<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<ClonedRepo>> {
            Box::pin(async {
                Ok(ClonedRepo {
                    local_path: PathBuf::from("/tmp/graft-test-clone"),
                    owner: "owner".to_string(),
                    name: "repo".to_string(),
                })
            })
        }

        fn list_source_files(&self, _root: &Path) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        fn read_files(&self, _root: &Path, paths: &[String]) -> Result<RepoContent> {
            Ok(paths
                .iter()
                .map(|p| (p.clone(), "print('x')".to_string()))
                .collect())
        }
    }

    struct StubMeta {
        valid: bool,
    }

    impl MetadataProvider for StubMeta {
        fn is_valid_url(&self, _url: &str) -> bool {
            self.valid
        }

        fn repo_info<'a>(
            &'a self,
            _owner: &'a str,
            _name: &'a str,
        ) -> BoxFuture<'a, Option<serde_json::Value>> {
            Box::pin(async { Some(serde_json::json!({"stars": 1})) })
        }

        fn validate<'a>(&'a self, _owner: &'a str, _name: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async move { self.valid })
        }
    }

    #[tokio::test]
    async fn invalid_url_is_a_setup_error() {
        let service = IntegrationService::new(
            StubRepo { files: vec![] },
            StubMeta { valid: false },
            Config::default(),
        );
        let err = service
            .run("not-a-repo", "do things", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid repository URL"));
    }

    #[tokio::test]
    async fn empty_repository_short_circuits_with_a_risk() {
        let service = IntegrationService::new(
            StubRepo { files: vec![] },
            StubMeta { valid: true },
            Config::default(),
        );
        let results = service
            .run("https://github.com/owner/repo", "do things", None)
            .await
            .unwrap();
        let analysis = results.analysis.unwrap();
        assert_eq!(analysis.risks, vec!["No source files found"]);
        assert!(results.implementation.is_none());
    }

    #[tokio::test]
    async fn validate_combines_format_and_reachability() {
        let service = IntegrationService::new(
            StubRepo { files: vec![] },
            StubMeta { valid: true },
            Config::default(),
        );
        assert!(service.validate("https://github.com/owner/repo").await);

        let service = IntegrationService::new(
            StubRepo { files: vec![] },
            StubMeta { valid: false },
            Config::default(),
        );
        assert!(!service.validate("https://github.com/owner/repo").await);
    }
}
