//! Configuration management for graft
//!
//! Stores settings in ~/.config/graft/config.json. Per-repository run
//! options come from an optional graft.toml at the repo root.

use crate::util::debug_stderr_enabled;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default per-period ceiling on completion-service calls.
pub const DEFAULT_MONTHLY_QUOTA: u32 = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion-service API key. Environment takes precedence on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL of the completion studio endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio_url: Option<String>,
    /// API key for the grounded-search model used by the research stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,
    /// Override for the monthly call quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quota: Option<u32>,
}

impl Config {
    fn sanitize(&mut self) {
        let drop_empty = |v: &mut Option<String>| {
            if v.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *v = None;
            }
        };
        drop_empty(&mut self.api_key);
        drop_empty(&mut self.studio_url);
        drop_empty(&mut self.search_api_key);
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("graft"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str::<Config>(&content) {
                    Ok(mut config) => {
                        config.sanitize();
                        return config;
                    }
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        if debug_stderr_enabled() {
                            eprintln!(
                                "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                                err
                            );
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)) {
                if debug_stderr_enabled() {
                    eprintln!(
                        "  Warning: Failed to set config directory permissions: {}",
                        e
                    );
                }
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    /// Completion-service API key (environment first, config file second).
    pub fn get_api_key(&self) -> Option<String> {
        env_non_empty("GRAFT_API_KEY")
            .or_else(|| env_non_empty("STUDIO_API_KEY"))
            .or_else(|| self.api_key.clone())
    }

    /// Completion studio base URL (environment first).
    pub fn get_studio_url(&self) -> Option<String> {
        env_non_empty("GRAFT_STUDIO_URL").or_else(|| self.studio_url.clone())
    }

    /// Grounded-search API key (environment first).
    pub fn get_search_api_key(&self) -> Option<String> {
        env_non_empty("GRAFT_SEARCH_API_KEY")
            .or_else(|| env_non_empty("GEMINI_API_KEY"))
            .or_else(|| self.search_api_key.clone())
    }

    pub fn get_monthly_quota(&self) -> u32 {
        self.monthly_quota.unwrap_or(DEFAULT_MONTHLY_QUOTA)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Keep a copy of a config file that failed to parse so user edits are
/// never silently destroyed by the defaults that replace them.
fn preserve_corrupt_config(path: &Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    let _ = fs::write(backup, content);
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

// ═══════════════════════════════════════════════════════════════════════════
//  PER-REPOSITORY RUN OPTIONS (graft.toml)
// ═══════════════════════════════════════════════════════════════════════════

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_max_files() -> usize {
    10
}

/// Options read from an optional `graft.toml` at the repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// File extensions treated as source files.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Upper bound on files read into the pipeline snapshot.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quota: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_files: default_max_files(),
            monthly_quota: None,
        }
    }
}

impl RunOptions {
    /// Load from `<root>/graft.toml`, falling back to defaults when the
    /// file is absent or malformed (a bad options file should not stop a
    /// run; it is debug-logged instead).
    pub fn load(repo_root: &Path) -> Self {
        let path = repo_root.join("graft.toml");
        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<RunOptions>(&content) {
                Ok(options) => options,
                Err(err) => {
                    if debug_stderr_enabled() {
                        eprintln!("  Warning: ignoring malformed graft.toml: {}", err);
                    }
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
