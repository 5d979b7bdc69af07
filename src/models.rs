use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommitParseError;

/// One file touched by a commit, as reported by the commit source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub additions: u32,
    pub deletions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// A repository visible to the commit source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Short name stored on each record.
    pub name: String,
    /// `owner/name` path used when talking to the remote API.
    pub full_name: String,
}

/// Commit metadata as listed by the source, before its files are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub sha: String,
    pub message: String,
    /// Author date exactly as the source delivered it.
    pub date: String,
}

/// Canonical commit descriptor produced by a source for a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_date: DateTime<Utc>,
    pub repository: String,
    pub file_changes: Vec<FileChange>,
}

impl RawCommit {
    /// Combine a listed commit with its file diffs, normalizing the date to UTC.
    pub fn normalize(
        repository: &str,
        commit: CommitRef,
        file_changes: Vec<FileChange>,
    ) -> Result<Self, CommitParseError> {
        let commit_hash = commit.sha.trim().to_string();
        if commit_hash.is_empty() {
            return Err(CommitParseError::MissingField("commit_hash"));
        }
        if !commit_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CommitParseError::InvalidHash(commit_hash));
        }
        if repository.is_empty() {
            return Err(CommitParseError::MissingField("repository"));
        }

        Ok(Self {
            commit_hash,
            commit_message: commit.message,
            commit_date: parse_commit_date(&commit.date)?,
            repository: repository.to_string(),
            file_changes,
        })
    }
}

/// Parse an ISO-8601 author date. A trailing `Z` is read as UTC; explicit
/// offsets are converted to UTC.
pub fn parse_commit_date(value: &str) -> Result<DateTime<Utc>, CommitParseError> {
    let trimmed = value.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|source| CommitParseError::InvalidDate {
            value: trimmed.to_string(),
            source,
        })
}

/// Render a stored instant in the same `Z`-suffixed form the API delivers.
pub fn format_commit_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// How `files_changed` is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilesChangedMode {
    #[default]
    List,
    Count,
}

impl FromStr for FilesChangedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown files_changed mode '{}'", other)),
        }
    }
}

/// Either the full per-file list or just its length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilesChanged {
    Count(u32),
    Files(Vec<FileChange>),
}

impl FilesChanged {
    pub fn len(&self) -> usize {
        match self {
            Self::Count(n) => *n as usize,
            Self::Files(files) => files.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Nature of a commit, as assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Feature,
    Bugfix,
    Refactor,
    Test,
    Docs,
    Integration,
    Style,
    Perf,
    Deps,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Feature,
        Category::Bugfix,
        Category::Refactor,
        Category::Test,
        Category::Docs,
        Category::Integration,
        Category::Style,
        Category::Perf,
        Category::Deps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "FEATURE",
            Self::Bugfix => "BUGFIX",
            Self::Refactor => "REFACTOR",
            Self::Test => "TEST",
            Self::Docs => "DOCS",
            Self::Integration => "INTEGRATION",
            Self::Style => "STYLE",
            Self::Perf => "PERF",
            Self::Deps => "DEPS",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Feature => "New feature or functionality addition",
            Self::Bugfix => "Bug fixes and corrections",
            Self::Refactor => "Code restructuring without behavior change",
            Self::Test => "Adding or modifying tests",
            Self::Docs => "Documentation updates",
            Self::Integration => "External service/API integration",
            Self::Style => "Code style/formatting changes",
            Self::Perf => "Performance improvements",
            Self::Deps => "Dependency updates",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let found = match normalized.as_str() {
            "FEATURE" | "FEAT" => Self::Feature,
            "BUGFIX" | "BUG_FIX" | "FIX" => Self::Bugfix,
            "REFACTOR" => Self::Refactor,
            "TEST" | "TESTS" => Self::Test,
            "DOCS" | "DOC" | "DOCUMENTATION" => Self::Docs,
            "INTEGRATION" => Self::Integration,
            "STYLE" => Self::Style,
            "PERF" | "PERFORMANCE" => Self::Perf,
            "DEPS" | "DEPENDENCY_UPDATE" | "DEPENDENCIES" => Self::Deps,
            _ => return Err(format!("unknown category '{}'", s.trim())),
        };
        Ok(found)
    }
}

/// Record ready for insertion. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLearningLog {
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_date: DateTime<Utc>,
    pub repository: String,
    pub lines_added: u32,
    pub lines_deleted: u32,
    pub files_changed: FilesChanged,
}

/// A persisted learning log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningLog {
    pub id: String,
    pub commit_hash: String,
    pub commit_message: String,
    #[serde(serialize_with = "serialize_commit_date")]
    pub commit_date: DateTime<Utc>,
    pub repository: String,
    pub lines_added: u32,
    pub lines_deleted: u32,
    pub files_changed: FilesChanged,
    pub category: Option<Category>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LearningLog {
    /// Compact text handed to the classifier: message plus aggregate stats.
    pub fn change_digest(&self) -> String {
        let mut digest = format!(
            "Repository: {}\nMessage: {}\nFiles changed: {} (+{} / -{})",
            self.repository,
            self.commit_message.trim(),
            self.files_changed.len(),
            self.lines_added,
            self.lines_deleted,
        );
        if let FilesChanged::Files(files) = &self.files_changed {
            for file in files.iter().take(20) {
                digest.push_str(&format!(
                    "\n  {} (+{} / -{})",
                    file.filename, file.additions, file.deletions
                ));
            }
        }
        digest
    }
}

fn serialize_commit_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_commit_date(date))
}
