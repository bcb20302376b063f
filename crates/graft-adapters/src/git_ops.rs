//! Repository acquisition: clone with a local cache, list source files,
//! read file contents with a size cap.

use crate::config::RunOptions;
use crate::github;
use crate::util::debug_log;
use anyhow::{Context, Result};
use git2::Repository;
use graft_core::model::RepoContent;
use graft_core::protocol::{BoxFuture, ClonedRepo, RepositoryProvider};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files larger than this are skipped when building the snapshot.
const MAX_FILE_BYTES: u64 = 100_000;

/// Directory names never descended into when listing sources.
const SKIP_DIRS: [&str; 6] = [
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
];

fn cache_root() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|p| p.join("graft").join("repos"))
        .context("Could not determine cache directory")
}

/// Clone `url` into the cache, reusing an existing clone when allowed.
pub fn clone_repository(url: &str, use_cache: bool) -> Result<ClonedRepo> {
    let (owner, name) =
        github::parse_repo_url(url).with_context(|| format!("Unrecognized repository URL: {}", url))?;

    let root = cache_root()?;
    fs::create_dir_all(&root).context("Failed to create clone cache directory")?;
    let local_path = root.join(format!("{}-{}", owner, name));

    if local_path.join(".git").exists() {
        if use_cache {
            debug_log(&format!("using cached clone at {}", local_path.display()));
            return Ok(ClonedRepo {
                local_path,
                owner,
                name,
            });
        }
        fs::remove_dir_all(&local_path).context("Failed to clear stale clone")?;
    }

    debug_log(&format!("cloning {} into {}", url, local_path.display()));
    Repository::clone(url, &local_path)
        .with_context(|| format!("Failed to clone repository {}", url))?;

    Ok(ClonedRepo {
        local_path,
        owner,
        name,
    })
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

/// Relative paths of source files under `root`, sorted for stable order.
pub fn list_source_files(root: &Path, extensions: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug_log(&format!("skipping unreadable entry: {}", err));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matches_ext = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if !matches_ext {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }

    files.sort();
    Ok(files)
}

/// Read the given relative paths into a snapshot. Oversized or unreadable
/// files are skipped with a warning, not treated as errors.
pub fn read_files(root: &Path, paths: &[String]) -> Result<RepoContent> {
    let mut content = RepoContent::new();

    for path in paths {
        let full = root.join(path);
        match fs::metadata(&full) {
            Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                debug_log(&format!(
                    "skipping oversized file {} ({} bytes)",
                    path,
                    meta.len()
                ));
                continue;
            }
            Err(err) => {
                debug_log(&format!("skipping unreadable file {}: {}", path, err));
                continue;
            }
            _ => {}
        }
        match fs::read_to_string(&full) {
            Ok(text) => {
                content.insert(path.clone(), text);
            }
            Err(err) => {
                debug_log(&format!("skipping non-text file {}: {}", path, err));
            }
        }
    }

    Ok(content)
}

/// Git-backed implementation of the core repository contract.
#[derive(Debug, Clone, Default)]
pub struct GitRepositoryProvider {
    options: RunOptions,
}

impl GitRepositoryProvider {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }
}

impl RepositoryProvider for GitRepositoryProvider {
    fn clone_repository<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClonedRepo>> {
        let url = url.to_string();
        Box::pin(async move {
            // git2 clones are blocking; keep the runtime free while we wait.
            tokio::task::spawn_blocking(move || clone_repository(&url, true))
                .await
                .context("Clone task was cancelled")?
        })
    }

    fn list_source_files(&self, root: &Path) -> Result<Vec<String>> {
        list_source_files(root, &self.options.extensions)
    }

    fn read_files(&self, root: &Path, paths: &[String]) -> Result<RepoContent> {
        read_files(root, paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn extensions() -> Vec<String> {
        vec!["py".to_string()]
    }

    #[test]
    fn list_source_files_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("b.py"), "x = 1").unwrap();
        fs::write(dir.path().join("pkg/a.py"), "y = 2").unwrap();
        fs::write(dir.path().join("readme.md"), "# hi").unwrap();

        let files = list_source_files(dir.path(), &extensions()).unwrap();
        assert_eq!(files, vec!["b.py", "pkg/a.py"]);
    }

    #[test]
    fn list_source_files_skips_vendored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__/cached.py"), "pass").unwrap();
        fs::write(dir.path().join("main.py"), "pass").unwrap();

        let files = list_source_files(dir.path(), &extensions()).unwrap();
        assert_eq!(files, vec!["main.py"]);
    }

    #[test]
    fn read_files_skips_oversized_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small.py"), "ok = True").unwrap();
        let big = "#".repeat((MAX_FILE_BYTES + 1) as usize);
        fs::write(dir.path().join("big.py"), big).unwrap();

        let paths = vec!["small.py".to_string(), "big.py".to_string()];
        let content = read_files(dir.path(), &paths).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content.get("small.py").unwrap(), "ok = True");
    }

    #[test]
    fn read_files_skips_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec!["ghost.py".to_string()];
        let content = read_files(dir.path(), &paths).unwrap();
        assert!(content.is_empty());
    }
}
