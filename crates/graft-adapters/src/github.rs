//! GitHub metadata: URL validation, owner/repo parsing, repository info.

use crate::util::{debug_log, truncate_str};
use graft_core::protocol::{BoxFuture, MetadataProvider};
use std::time::Duration;

const GITHUB_API: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "graft-integrator";

/// Extract owner and repo from a GitHub URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo.git
/// - https://github.com/owner/repo
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    // SSH format: git@github.com:owner/repo.git
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        return split_owner_repo(rest);
    }

    if url.contains("github.com") {
        if let Ok(parsed) = url::Url::parse(url) {
            if parsed.host_str() != Some("github.com") && parsed.host_str() != Some("www.github.com")
            {
                return None;
            }
            return split_owner_repo(parsed.path().trim_start_matches('/'));
        }

        // Fallback: simple string parsing for URLs without scheme
        let path = url.split("github.com").nth(1)?.trim_start_matches(['/', ':']);
        return split_owner_repo(path);
    }

    None
}

fn split_owner_repo(path: &str) -> Option<(String, String)> {
    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.splitn(3, '/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    let valid = |s: &str| {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    };
    if !valid(owner) || !valid(repo) {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Whether `url` looks like a repository URL we can work with.
pub fn is_valid_github_url(url: &str) -> bool {
    parse_repo_url(url).is_some()
}

fn api_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(API_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
}

/// Fetch repository metadata without cloning. Returns None when the
/// repository does not exist or the API is unreachable.
pub async fn repository_info(owner: &str, name: &str) -> Option<serde_json::Value> {
    let client = match api_client() {
        Ok(client) => client,
        Err(err) => {
            debug_log(&format!("could not build API client: {}", err));
            return None;
        }
    };

    let url = format!("{}/repos/{}/{}", GITHUB_API, owner, name);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug_log(&format!("repo info request failed: {}", err));
            return None;
        }
    };

    if !response.status().is_success() {
        debug_log(&format!(
            "repo info for {}/{} returned {}",
            owner,
            name,
            response.status()
        ));
        return None;
    }

    match response.json::<serde_json::Value>().await {
        Ok(value) => Some(value),
        Err(err) => {
            debug_log(&format!(
                "repo info body unreadable: {}",
                truncate_str(&err.to_string(), 200)
            ));
            None
        }
    }
}

/// Whether the repository exists and is reachable.
pub async fn validate_repository(owner: &str, name: &str) -> bool {
    repository_info(owner, name).await.is_some()
}

/// reqwest-backed implementation of the core metadata contract.
#[derive(Debug, Clone, Default)]
pub struct GitHubMetadataProvider;

impl MetadataProvider for GitHubMetadataProvider {
    fn is_valid_url(&self, url: &str) -> bool {
        is_valid_github_url(url)
    }

    fn repo_info<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Option<serde_json::Value>> {
        Box::pin(repository_info(owner, name))
    }

    fn validate<'a>(&'a self, owner: &'a str, name: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(validate_repository(owner, name))
    }
}
