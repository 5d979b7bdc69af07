use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::{CommitRef, FileChange, RepositoryInfo};

pub mod github;
pub mod local;

pub use github::GitHubSource;
pub use local::LocalGitSource;

/// Read access to a developer's commit history.
///
/// Calls are issued one repository at a time, so a sync only pulls what it
/// is about to store.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Resolve the author whose commits are collected. `None` means the
    /// identity behind the configured credential.
    async fn current_user(&self, username: Option<&str>) -> Result<String, SourceError>;

    /// Repositories owned by or accessible to `user`.
    async fn list_repositories(&self, user: &str) -> Result<Vec<RepositoryInfo>, SourceError>;

    /// Commits in `repo` authored by `author`, optionally only those after `since`.
    async fn list_commits(
        &self,
        repo: &RepositoryInfo,
        author: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitRef>, SourceError>;

    /// Per-file change statistics for one commit.
    async fn commit_files(
        &self,
        repo: &RepositoryInfo,
        sha: &str,
    ) -> Result<Vec<FileChange>, SourceError>;
}
