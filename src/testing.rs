//! In-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::classifier::Classifier;
use crate::error::{ClassifierError, SourceError};
use crate::models::{Category, CommitRef, FileChange, RepositoryInfo};
use crate::source::CommitSource;

#[derive(Debug, Clone, Copy)]
pub enum RepoFailure {
    Access,
    Empty,
    Auth,
}

#[derive(Default)]
pub struct FakeSource {
    login: String,
    reject_credentials: bool,
    listing_fails: bool,
    repos: Vec<RepositoryInfo>,
    commits: HashMap<String, Result<Vec<CommitRef>, RepoFailure>>,
    files: HashMap<String, Vec<FileChange>>,
    pub commit_list_calls: Mutex<Vec<String>>,
    pub file_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            ..Default::default()
        }
    }

    pub fn rejecting_credentials() -> Self {
        Self {
            reject_credentials: true,
            ..Default::default()
        }
    }

    /// Repository enumeration answers with an undecodable payload.
    pub fn failing_listing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn repo(mut self, name: &str, commits: Vec<(CommitRef, Vec<FileChange>)>) -> Self {
        let mut refs = Vec::new();
        for (commit, files) in commits {
            self.files.insert(commit.sha.clone(), files);
            refs.push(commit);
        }
        self.add_repo(name, Ok(refs))
    }

    pub fn failing_repo(self, name: &str, failure: RepoFailure) -> Self {
        self.add_repo(name, Err(failure))
    }

    fn add_repo(mut self, name: &str, commits: Result<Vec<CommitRef>, RepoFailure>) -> Self {
        self.repos.push(RepositoryInfo {
            name: name.to_string(),
            full_name: format!("{}/{}", self.login, name),
        });
        self.commits.insert(name.to_string(), commits);
        self
    }

    pub fn listed_repos(&self) -> Vec<String> {
        self.commit_list_calls.lock().unwrap().clone()
    }
}

pub fn commit(sha: &str, date: &str, message: &str) -> CommitRef {
    CommitRef {
        sha: sha.to_string(),
        message: message.to_string(),
        date: date.to_string(),
    }
}

pub fn file(name: &str, additions: u32, deletions: u32) -> FileChange {
    FileChange {
        filename: name.to_string(),
        additions,
        deletions,
        patch: None,
    }
}

#[async_trait]
impl CommitSource for FakeSource {
    async fn current_user(&self, username: Option<&str>) -> Result<String, SourceError> {
        if self.reject_credentials {
            return Err(SourceError::Authentication("Bad credentials".into()));
        }
        Ok(username.unwrap_or(&self.login).to_string())
    }

    async fn list_repositories(&self, _user: &str) -> Result<Vec<RepositoryInfo>, SourceError> {
        if self.listing_fails {
            return Err(SourceError::Decode("expected a repository array".into()));
        }
        Ok(self.repos.clone())
    }

    async fn list_commits(
        &self,
        repo: &RepositoryInfo,
        _author: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitRef>, SourceError> {
        self.commit_list_calls.lock().unwrap().push(repo.name.clone());

        match self.commits.get(&repo.name) {
            Some(Ok(commits)) => Ok(commits
                .iter()
                .filter(|c| match (since, DateTime::parse_from_rfc3339(&c.date)) {
                    (Some(since), Ok(date)) => date.with_timezone(&Utc) >= since,
                    _ => true,
                })
                .cloned()
                .collect()),
            Some(Err(RepoFailure::Access)) => Err(SourceError::RepositoryAccess {
                repository: repo.name.clone(),
                reason: "403 Forbidden".into(),
            }),
            Some(Err(RepoFailure::Empty)) => Err(SourceError::EmptyRepository(repo.name.clone())),
            Some(Err(RepoFailure::Auth)) => {
                Err(SourceError::Authentication("token revoked".into()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn commit_files(
        &self,
        _repo: &RepositoryInfo,
        sha: &str,
    ) -> Result<Vec<FileChange>, SourceError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(sha)
            .cloned()
            .ok_or_else(|| SourceError::Decode(format!("no such commit {}", sha)))
    }
}

/// Classifier answering from a fixed script.
pub struct FakeClassifier {
    answer: Option<Category>,
    fail_when_contains: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn always(category: Category) -> Self {
        Self {
            answer: Some(category),
            fail_when_contains: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            fail_when_contains: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(category: Category, needle: &str) -> Self {
        Self {
            answer: Some(category),
            fail_when_contains: Some(needle.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer_for(&self, text: &str) -> Option<Category> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_when_contains {
            if text.contains(needle.as_str()) {
                return None;
            }
        }
        self.answer
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, text: &str) -> Result<Category, ClassifierError> {
        self.answer_for(text)
            .ok_or_else(|| ClassifierError::UnknownCategory("UNKNOWN".into()))
    }

    async fn summarize(&self, commit_message: &str, repository: &str) -> Result<String, ClassifierError> {
        self.answer_for(commit_message)
            .map(|category| format!("{} work in {}: {}", category, repository, commit_message.trim()))
            .ok_or(ClassifierError::EmptyResponse)
    }
}
