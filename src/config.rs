use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::models::FilesChangedMode;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BACKFILL_LIMIT: usize = 5;
pub const MAX_BACKFILL_LIMIT: usize = 15;

/// Where commits are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    GitHub { token: String, api_url: String },
    Local { root: PathBuf, author: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub source: SourceConfig,
    pub excluded_repos: HashSet<String>,
    pub files_changed_mode: FilesChangedMode,
    pub classifier: Option<ClassifierConfig>,
    pub backfill_limit: usize,
    pub classify_after_sync: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = match get("COMMIT_SOURCE").as_deref().unwrap_or("github") {
            "github" => SourceConfig::GitHub {
                token: get("GITHUB_TOKEN").ok_or(ConfigError::Missing("GITHUB_TOKEN"))?,
                api_url: get("GITHUB_API_URL")
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.into())
                    .trim_end_matches('/')
                    .to_string(),
            },
            "local" => SourceConfig::Local {
                root: get("LOCAL_REPOS_DIR")
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing("LOCAL_REPOS_DIR"))?,
                author: get("LOCAL_AUTHOR"),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "COMMIT_SOURCE",
                    value: other.to_string(),
                    reason: "expected 'github' or 'local'".into(),
                })
            }
        };

        let excluded_repos = get("EXCLUDED_REPOS")
            .map(|raw| parse_repo_list(&raw))
            .unwrap_or_default();

        let files_changed_mode = match get("FILES_CHANGED_MODE") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "FILES_CHANGED_MODE",
                value: raw.clone(),
                reason,
            })?,
            None => FilesChangedMode::default(),
        };

        let classifier = get("OPENAI_API_KEY").map(|api_key| ClassifierConfig {
            api_key,
            api_base: get("OPENAI_API_BASE")
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.into())
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
        });

        let backfill_limit = match get("BACKFILL_LIMIT") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                key: "BACKFILL_LIMIT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_BACKFILL_LIMIT,
        };

        let classify_after_sync = match get("CLASSIFY_AFTER_SYNC") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "CLASSIFY_AFTER_SYNC",
                value: raw.clone(),
                reason: "expected a boolean".into(),
            })?,
            None => false,
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://learning_log.db?mode=rwc".into()),
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
            source,
            excluded_repos,
            files_changed_mode,
            classifier,
            backfill_limit: clamp_batch(backfill_limit),
            classify_after_sync,
        })
    }
}

/// Backfill batches are never unbounded.
pub fn clamp_batch(limit: usize) -> usize {
    limit.clamp(1, MAX_BACKFILL_LIMIT)
}

fn parse_repo_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
