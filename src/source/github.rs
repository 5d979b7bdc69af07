use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::CommitSource;
use crate::error::SourceError;
use crate::models::{CommitRef, FileChange, RepositoryInfo};

const PER_PAGE: u32 = 100;
const REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// GitHub REST API client for commit history.
pub struct GitHubSource {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoPayload {
    name: String,
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CommitListPayload {
    sha: String,
    commit: CommitDetailPayload,
}

#[derive(Debug, Deserialize)]
struct CommitDetailPayload {
    message: String,
    author: Option<AuthorPayload>,
    committer: Option<AuthorPayload>,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitFilesPayload {
    #[serde(default)]
    files: Vec<FilePayload>,
}

#[derive(Debug, Deserialize)]
struct FilePayload {
    filename: String,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    patch: Option<String>,
}

impl From<CommitListPayload> for CommitRef {
    fn from(payload: CommitListPayload) -> Self {
        let date = payload
            .commit
            .author
            .and_then(|a| a.date)
            .or_else(|| payload.commit.committer.and_then(|c| c.date))
            .unwrap_or_default();

        Self {
            sha: payload.sha,
            message: payload.commit.message,
            date,
        }
    }
}

impl From<FilePayload> for FileChange {
    fn from(payload: FilePayload) -> Self {
        Self {
            filename: payload.filename,
            additions: payload.additions,
            deletions: payload.deletions,
            patch: payload.patch,
        }
    }
}

impl GitHubSource {
    pub fn new(api_url: &str, token: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<Response, SourceError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "learning-log-service")
            .send()
            .await?;
        Ok(response)
    }

    /// GET a single JSON document; `scope` names the repository for error mapping.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, scope: &str) -> Result<T, SourceError> {
        let response = self.get(url).await?;
        let response = check_status(response, scope).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(format!("{}: {}", url, e)))
    }

    /// GET every page of a list endpoint, following `Link: rel="next"`.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        first_url: String,
        scope: &str,
    ) -> Result<Vec<T>, SourceError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next {
            let response = self.get(&url).await?;
            let response = check_status(response, scope).await?;
            next = next_page_link(response.headers());

            let page: Vec<T> = response
                .json()
                .await
                .map_err(|e| SourceError::Decode(format!("{}: {}", url, e)))?;
            items.extend(page);
        }

        Ok(items)
    }
}

#[async_trait]
impl CommitSource for GitHubSource {
    async fn current_user(&self, username: Option<&str>) -> Result<String, SourceError> {
        let url = match username {
            Some(name) => format!("{}/users/{}", self.api_url, name),
            None => format!("{}/user", self.api_url),
        };
        let user: UserPayload = self.get_json(&url, username.unwrap_or("user")).await?;
        Ok(user.login)
    }

    async fn list_repositories(&self, user: &str) -> Result<Vec<RepositoryInfo>, SourceError> {
        // The authenticated user's own listing includes private repositories.
        let me = self.current_user(None).await?;
        let url = if me.eq_ignore_ascii_case(user) {
            format!("{}/user/repos?per_page={}", self.api_url, PER_PAGE)
        } else {
            format!("{}/users/{}/repos?per_page={}", self.api_url, user, PER_PAGE)
        };

        let repos: Vec<RepoPayload> = self.get_paginated(url, user).await?;
        Ok(repos
            .into_iter()
            .map(|r| RepositoryInfo {
                name: r.name,
                full_name: r.full_name,
            })
            .collect())
    }

    async fn list_commits(
        &self,
        repo: &RepositoryInfo,
        author: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitRef>, SourceError> {
        let mut url = format!(
            "{}/repos/{}/commits?author={}&per_page={}",
            self.api_url, repo.full_name, author, PER_PAGE
        );
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let commits: Vec<CommitListPayload> = self.get_paginated(url, &repo.name).await?;
        Ok(commits.into_iter().map(CommitRef::from).collect())
    }

    async fn commit_files(
        &self,
        repo: &RepositoryInfo,
        sha: &str,
    ) -> Result<Vec<FileChange>, SourceError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_url, repo.full_name, sha);
        let detail: CommitFilesPayload = self.get_json(&url, &repo.name).await?;
        Ok(detail.files.into_iter().map(FileChange::from).collect())
    }
}

async fn check_status(response: Response, scope: &str) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    let body = response.text().await.unwrap_or_default();

    Err(classify_status(status, rate_limited, scope, body))
}

/// Map a non-success status onto the source error taxonomy.
fn classify_status(status: StatusCode, rate_limited: bool, scope: &str, body: String) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED => SourceError::Authentication(body),
        StatusCode::CONFLICT => SourceError::EmptyRepository(scope.to_string()),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limited => {
            SourceError::RateLimited(scope.to_string())
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
            SourceError::RepositoryAccess {
                repository: scope.to_string(),
                reason: format!("{} {}", status.as_u16(), body),
            }
        }
        other => SourceError::Decode(format!("{} returned {}: {}", scope, other.as_u16(), body)),
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == r#"rel="next""#);
        if is_next && target.starts_with('<') && target.ends_with('>') {
            Some(target[1..target.len() - 1].to_string())
        } else {
            None
        }
    })
}
