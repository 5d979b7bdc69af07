use std::ops::AddAssign;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::{SourceError, SyncError};
use crate::filter::RepositoryFilter;
use crate::models::{CommitRef, FilesChangedMode, NewLearningLog, RawCommit, RepositoryInfo};
use crate::source::CommitSource;
use crate::store::{LogStore, WriteOutcome};

/// Counts returned by a sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
    Processed,
    Skipped,
    Failed,
}

impl SyncReport {
    fn record(&mut self, outcome: CommitOutcome) {
        match outcome {
            CommitOutcome::Processed => self.processed += 1,
            CommitOutcome::Skipped => self.skipped += 1,
            CommitOutcome::Failed => self.failed += 1,
        }
    }
}

/// Drives one pass from the commit source into the store.
pub struct SyncOrchestrator {
    source: Arc<dyn CommitSource>,
    filter: RepositoryFilter,
    store: LogStore,
    mode: FilesChangedMode,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn CommitSource>,
        filter: RepositoryFilter,
        store: LogStore,
        mode: FilesChangedMode,
    ) -> Self {
        Self {
            source,
            filter,
            store,
            mode,
        }
    }

    /// Ingest every commit by `username` (default: the credential's owner),
    /// optionally only those after `since`.
    ///
    /// Per-repository and per-commit failures are counted and skipped; only an
    /// authentication failure aborts the run.
    pub async fn sync(
        &self,
        username: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync", run_id = %run_id);
        self.run(username, since).instrument(span).await
    }

    async fn run(
        &self,
        username: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        let author = match self.source.current_user(username).await {
            Ok(author) => author,
            Err(e) => {
                let e = escalate(e)?;
                tracing::warn!("Could not resolve user {:?}: {}", username, e);
                return Ok(SyncReport::default());
            }
        };

        let repos = match self.source.list_repositories(&author).await {
            Ok(repos) => repos,
            Err(e) => {
                let e = escalate(e)?;
                tracing::warn!("Could not list repositories for {}: {}", author, e);
                return Ok(SyncReport::default());
            }
        };

        tracing::info!("Syncing {} repositories for {}", repos.len(), author);

        let mut report = SyncReport::default();
        for repo in &repos {
            if self.filter.is_excluded(&repo.name) {
                tracing::info!("Excluded repository {}", repo.name);
                continue;
            }
            report += self.sync_repository(repo, &author, since).await?;
        }

        tracing::info!(
            "Sync finished: {} processed, {} skipped, {} failed",
            report.processed,
            report.skipped,
            report.failed
        );

        Ok(report)
    }

    async fn sync_repository(
        &self,
        repo: &RepositoryInfo,
        author: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, SyncError> {
        let commits = match self.source.list_commits(repo, author, since).await {
            Ok(commits) => commits,
            Err(e) => {
                match escalate(e)? {
                    SourceError::EmptyRepository(name) => {
                        tracing::info!("Repository {} is empty, skipping", name)
                    }
                    e => tracing::warn!("Skipping repository {}: {}", repo.name, e),
                }
                return Ok(SyncReport::default());
            }
        };

        tracing::info!("Fetched {} commits from {}", commits.len(), repo.name);

        let mut report = SyncReport::default();
        for commit in commits {
            report.record(self.ingest_commit(repo, commit).await?);
        }
        Ok(report)
    }

    async fn ingest_commit(
        &self,
        repo: &RepositoryInfo,
        commit: CommitRef,
    ) -> Result<CommitOutcome, SyncError> {
        let short = short_sha(&commit.sha).to_string();

        // Known hashes need no file fetch
        match self.store.find_by_hash(&commit.sha).await {
            Ok(Some(_)) => {
                tracing::debug!("Commit {} already stored, skipping", short);
                return Ok(CommitOutcome::Skipped);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Lookup of {} failed, attempting insert: {}", short, e);
            }
        }

        let files = match self.source.commit_files(repo, &commit.sha).await {
            Ok(files) => files,
            Err(e) => {
                let e = escalate(e)?;
                tracing::warn!("Failed to fetch files for {} in {}: {}", short, repo.name, e);
                return Ok(CommitOutcome::Failed);
            }
        };

        let raw = match RawCommit::normalize(&repo.name, commit, files) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Rejected commit {} in {}: {}", short, repo.name, e);
                return Ok(CommitOutcome::Failed);
            }
        };

        let stats = aggregate(&raw.file_changes, self.mode);
        let record = NewLearningLog {
            commit_hash: raw.commit_hash,
            commit_message: raw.commit_message,
            commit_date: raw.commit_date,
            repository: raw.repository,
            lines_added: stats.lines_added,
            lines_deleted: stats.lines_deleted,
            files_changed: stats.files_changed,
        };

        let outcome = match self.store.write(&record).await {
            WriteOutcome::Inserted => {
                tracing::debug!(
                    "Stored commit {} (+{} / -{})",
                    short,
                    record.lines_added,
                    record.lines_deleted
                );
                CommitOutcome::Processed
            }
            WriteOutcome::AlreadyExists => {
                tracing::debug!("Commit {} already stored, skipping", short);
                CommitOutcome::Skipped
            }
            WriteOutcome::Failed(reason) => {
                tracing::warn!("Failed to store commit {}: {}", short, reason);
                CommitOutcome::Failed
            }
        };

        Ok(outcome)
    }
}

/// Hand a non-fatal source error back to the caller; a fatal one ends the run.
fn escalate(error: SourceError) -> Result<SourceError, SyncError> {
    if error.is_fatal() {
        Err(SyncError::Authentication(error.to_string()))
    } else {
        Ok(error)
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilesChanged;
    use crate::testing::{commit, file, FakeSource, RepoFailure};
    use std::sync::atomic::Ordering;

    async fn orchestrator(source: FakeSource, excluded: &[&str]) -> (SyncOrchestrator, Arc<FakeSource>, LogStore) {
        let store = LogStore::in_memory().await.unwrap();
        let source = Arc::new(source);
        let orchestrator = SyncOrchestrator::new(
            source.clone(),
            RepositoryFilter::new(excluded.iter().copied()),
            store.clone(),
            FilesChangedMode::List,
        );
        (orchestrator, source, store)
    }

    fn seed_record(hash: &str) -> NewLearningLog {
        NewLearningLog {
            commit_hash: hash.to_string(),
            commit_message: "earlier import".into(),
            commit_date: crate::models::parse_commit_date("2023-12-31T09:00:00Z").unwrap(),
            repository: "api".into(),
            lines_added: 0,
            lines_deleted: 0,
            files_changed: FilesChanged::Files(vec![]),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_with_exclusion_and_duplicate() {
        let source = FakeSource::new("dev")
            .repo(
                "cs101-homework",
                vec![(commit("f00d01", "2024-01-01T08:00:00Z", "hw1"), vec![file("hw.py", 10, 0)])],
            )
            .repo(
                "api",
                vec![
                    (commit("aaa001", "2024-01-02T10:00:00Z", "feat: cache"), vec![file("a.rs", 5, 2)]),
                    (commit("aaa002", "2024-01-03T10:00:00Z", "fix: ttl"), vec![file("b.rs", 1, 1)]),
                    (commit("bbb999", "2024-01-04T10:00:00Z", "docs"), vec![file("README.md", 3, 0)]),
                ],
            );
        let (orchestrator, _, store) = orchestrator(source, &["cs101-homework"]).await;
        assert_eq!(store.write(&seed_record("bbb999")).await, WriteOutcome::Inserted);

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![
                (commit("aaa001", "2024-01-02T10:00:00Z", "one"), vec![]),
                (commit("aaa002", "2024-01-03T10:00:00Z", "two"), vec![]),
                (commit("aaa003", "2024-01-04T10:00:00Z", "three"), vec![]),
            ],
        );
        let (orchestrator, source, store) = orchestrator(source, &[]).await;

        let first = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(first.processed, 3);
        let fetched = source.file_calls.load(Ordering::SeqCst);

        let second = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(
            second,
            SyncReport {
                processed: 0,
                skipped: 3,
                failed: 0
            }
        );
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(source.file_calls.load(Ordering::SeqCst), fetched);
    }

    #[tokio::test]
    async fn test_excluded_repository_is_never_listed() {
        let source = FakeSource::new("dev")
            .repo("scratch", vec![(commit("ccc001", "2024-01-01T00:00:00Z", "x"), vec![])])
            .repo("api", vec![(commit("aaa001", "2024-01-01T00:00:00Z", "y"), vec![])]);
        let (orchestrator, source, store) = orchestrator(source, &["scratch"]).await;

        orchestrator.sync(None, None).await.unwrap();

        assert_eq!(source.listed_repos(), vec!["api".to_string()]);
        let stored = store.list_all().await.unwrap();
        assert!(stored.iter().all(|log| log.repository != "scratch"));
    }

    #[tokio::test]
    async fn test_failing_repository_is_isolated() {
        let source = FakeSource::new("dev")
            .repo("a", vec![(commit("aaa001", "2024-01-01T00:00:00Z", "a1"), vec![])])
            .failing_repo("b", RepoFailure::Access)
            .failing_repo("empty", RepoFailure::Empty)
            .repo(
                "c",
                vec![
                    (commit("ccc001", "2024-01-02T00:00:00Z", "c1"), vec![]),
                    (commit("ccc002", "2024-01-03T00:00:00Z", "c2"), vec![]),
                ],
            );
        let (orchestrator, _, store) = orchestrator(source, &[]).await;

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 0);
        assert!(store.find_by_hash("aaa001").await.unwrap().is_some());
        assert!(store.find_by_hash("ccc002").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_commit_is_counted_and_run_continues() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![
                (commit("aaa001", "not a date", "broken"), vec![]),
                (commit("aaa002", "2024-01-03T10:00:00Z", "fine"), vec![file("x.rs", 2, 0)]),
            ],
        );
        let (orchestrator, _, store) = orchestrator(source, &[]).await;

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 1,
                skipped: 0,
                failed: 1
            }
        );
        assert!(store.find_by_hash("aaa001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts() {
        let (orchestrator, _, _) = orchestrator(FakeSource::rejecting_credentials(), &[]).await;
        let err = orchestrator.sync(None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_credential_revoked_mid_run_aborts() {
        let source = FakeSource::new("dev")
            .repo("a", vec![(commit("aaa001", "2024-01-01T00:00:00Z", "a1"), vec![])])
            .failing_repo("b", RepoFailure::Auth);
        let (orchestrator, _, _) = orchestrator(source, &[]).await;

        let err = orchestrator.sync(None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_stored_stats_match_file_changes() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![(
                commit("aaa001", "2024-01-01T10:00:00Z", "feat: cache"),
                vec![file("a.rs", 5, 2), file("b.rs", 3, 0)],
            )],
        );
        let (orchestrator, _, store) = orchestrator(source, &[]).await;
        orchestrator.sync(None, None).await.unwrap();

        let log = store.find_by_hash("aaa001").await.unwrap().unwrap();
        assert_eq!(log.lines_added, 8);
        assert_eq!(log.lines_deleted, 2);
        assert_eq!(log.files_changed.len(), 2);
        assert_eq!(crate::models::format_commit_date(&log.commit_date), "2024-01-01T10:00:00Z");
    }

    #[tokio::test]
    async fn test_since_is_passed_to_the_source() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![
                (commit("aaa001", "2024-01-01T10:00:00Z", "old"), vec![]),
                (commit("aaa002", "2024-02-01T10:00:00Z", "new"), vec![]),
            ],
        );
        let (orchestrator, _, store) = orchestrator(source, &[]).await;

        let since = crate::models::parse_commit_date("2024-01-15T00:00:00Z").unwrap();
        let report = orchestrator.sync(None, Some(since)).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(store.find_by_hash("aaa002").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_listing_failure_returns_empty_report() {
        let source = FakeSource::new("dev")
            .repo("api", vec![(commit("aaa001", "2024-01-01T00:00:00Z", "a1"), vec![])])
            .failing_listing();
        let (orchestrator, source, store) = orchestrator(source, &[]).await;

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(source.listed_repos().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_counted_and_run_continues() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![
                (commit("aaa001", "2024-01-01T10:00:00Z", "rejected"), vec![file("a.rs", 1, 0)]),
                (commit("aaa002", "2024-01-02T10:00:00Z", "kept"), vec![file("b.rs", 2, 0)]),
            ],
        );
        let (orchestrator, _, store) = orchestrator(source, &[]).await;
        store
            .execute_raw(
                "CREATE TRIGGER reject_aaa001 BEFORE INSERT ON learning_logs \
                 WHEN NEW.commit_hash = 'aaa001' BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .await
            .unwrap();

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 1,
                skipped: 0,
                failed: 1
            }
        );
        assert!(store.find_by_hash("aaa001").await.unwrap().is_none());
        assert!(store.find_by_hash("aaa002").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_existing_row_is_still_deduplicated() {
        let source = FakeSource::new("dev").repo(
            "api",
            vec![(commit("aaa001", "2024-01-01T10:00:00Z", "again"), vec![file("a.rs", 1, 0)])],
        );
        let (orchestrator, source, store) = orchestrator(source, &[]).await;
        store
            .execute_raw(
                "INSERT INTO learning_logs (id, commit_hash, commit_message, commit_date, repository, \
                 lines_added, lines_deleted, files_changed, created_at) VALUES \
                 ('old', 'aaa001', 'again', '2024-01-01T10:00:00Z', 'api', 1, 0, 'not json', \
                 '2024-01-01T10:00:00Z');",
            )
            .await
            .unwrap();
        assert!(store.find_by_hash("aaa001").await.is_err());

        let report = orchestrator.sync(None, None).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                processed: 0,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(source.file_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
