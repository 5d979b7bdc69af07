use thiserror::Error;

/// Invalid or missing startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures reported by a commit source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("repository '{repository}' is not accessible: {reason}")]
    RepositoryAccess { repository: String, reason: String },
    #[error("repository '{0}' has no commits yet")]
    EmptyRepository(String),
    #[error("rate limit exhausted while reading '{0}'")]
    RateLimited(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl SourceError {
    /// Only a rejected credential stops a whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// A single commit could not be turned into a record.
#[derive(Debug, Error)]
pub enum CommitParseError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid commit hash '{0}'")]
    InvalidHash(String),
    #[error("invalid commit date '{value}': {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// The classifier or summarizer did not produce a usable answer.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier is not configured")]
    Unavailable,
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("classifier returned an empty response")]
    EmptyResponse,
    #[error("classifier returned an unknown category: {0}")]
    UnknownCategory(String),
}

/// Whole-run failures of a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Authentication(String),
    #[error("a sync is already running")]
    AlreadyRunning,
}
