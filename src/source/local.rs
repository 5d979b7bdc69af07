use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::{DiffOptions, ErrorCode, Oid, Patch, Repository};

use super::CommitSource;
use crate::error::SourceError;
use crate::models::{format_commit_date, CommitRef, FileChange, RepositoryInfo};

/// Reads commit history from a directory of local clones.
///
/// Every immediate subdirectory that opens as a git repository counts as one
/// repository; its directory name is the repository name.
pub struct LocalGitSource {
    root: PathBuf,
    author: Option<String>,
}

impl LocalGitSource {
    pub fn new(root: impl Into<PathBuf>, author: Option<String>) -> Self {
        Self {
            root: root.into(),
            author,
        }
    }
}

#[async_trait]
impl CommitSource for LocalGitSource {
    async fn current_user(&self, username: Option<&str>) -> Result<String, SourceError> {
        if let Some(name) = username.map(str::to_string).or_else(|| self.author.clone()) {
            return Ok(name);
        }

        tokio::task::spawn_blocking(|| {
            git2::Config::open_default()
                .and_then(|config| config.get_string("user.email"))
                .map_err(|e| {
                    SourceError::Authentication(format!("no author identity configured: {}", e))
                })
        })
        .await
        .map_err(|e| SourceError::Decode(e.to_string()))?
    }

    async fn list_repositories(&self, _user: &str) -> Result<Vec<RepositoryInfo>, SourceError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || discover_repositories(&root))
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?
    }

    async fn list_commits(
        &self,
        repo: &RepositoryInfo,
        author: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitRef>, SourceError> {
        let repo = repo.clone();
        let author = author.to_string();
        tokio::task::spawn_blocking(move || walk_commits(&repo, &author, since))
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?
    }

    async fn commit_files(
        &self,
        repo: &RepositoryInfo,
        sha: &str,
    ) -> Result<Vec<FileChange>, SourceError> {
        let repo = repo.clone();
        let sha = sha.to_string();
        tokio::task::spawn_blocking(move || changed_files(&repo, &sha))
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?
    }
}

fn discover_repositories(root: &Path) -> Result<Vec<RepositoryInfo>, SourceError> {
    let entries = std::fs::read_dir(root).map_err(|e| SourceError::RepositoryAccess {
        repository: root.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut repos = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if Repository::open(&path).is_err() {
            tracing::debug!("Skipping non-repository directory {:?}", path);
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        repos.push(RepositoryInfo {
            name,
            full_name: path.to_string_lossy().to_string(),
        });
    }

    repos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repos)
}

fn open(repo: &RepositoryInfo) -> Result<Repository, SourceError> {
    Repository::open(&repo.full_name).map_err(|e| SourceError::RepositoryAccess {
        repository: repo.name.clone(),
        reason: e.message().to_string(),
    })
}

fn walk_commits(
    info: &RepositoryInfo,
    author: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<CommitRef>, SourceError> {
    let repo = open(info)?;

    match repo.head() {
        Ok(_) => {}
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Err(SourceError::EmptyRepository(info.name.clone()));
        }
        Err(e) => return Err(e.into()),
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    revwalk.set_sorting(git2::Sort::TIME)?;

    // Comma-separated list of names or emails
    let filters: Vec<&str> = author
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let since_ts = since.map(|s| s.timestamp());

    let mut commits = Vec::new();
    for oid in revwalk.flatten() {
        let commit = repo.find_commit(oid)?;
        let time = commit.author().when().seconds();

        if let Some(start) = since_ts {
            if time < start {
                continue;
            }
        }

        let signature = commit.author();
        let author_email = signature.email().unwrap_or("");
        let author_name = signature.name().unwrap_or("");
        if !filters.is_empty()
            && !filters
                .iter()
                .any(|f| author_email.eq_ignore_ascii_case(f) || author_name.contains(f))
        {
            continue;
        }

        let date = DateTime::from_timestamp(time, 0)
            .map(|d| format_commit_date(&d))
            .unwrap_or_default();

        commits.push(CommitRef {
            sha: oid.to_string(),
            message: commit.message().unwrap_or("").to_string(),
            date,
        });
    }

    Ok(commits)
}

fn changed_files(info: &RepositoryInfo, sha: &str) -> Result<Vec<FileChange>, SourceError> {
    let repo = open(info)?;
    let oid = Oid::from_str(sha)?;
    let commit = repo.find_commit(oid)?;

    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

    let mut opts = DiffOptions::new();
    opts.include_untracked(false);
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

    let mut files = Vec::new();
    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        let filename = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let (additions, deletions, patch) = match Patch::from_diff(&diff, idx)? {
            Some(mut patch) => {
                let (_, additions, deletions) = patch.line_stats()?;
                let text = patch.to_buf()?.as_str().map(str::to_string);
                (additions, deletions, text)
            }
            None => (0, 0, None),
        };

        files.push(FileChange {
            filename,
            additions: u32::try_from(additions).unwrap_or(u32::MAX),
            deletions: u32::try_from(deletions).unwrap_or(u32::MAX),
            patch,
        });
    }

    Ok(files)
}
