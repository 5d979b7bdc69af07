use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::classifier::Classifier;
use crate::store::LogStore;

/// Counts returned by a backfill pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Fills in AI annotations on stored records that lack them.
///
/// Only records whose field is still NULL are selected, and failures leave
/// the field NULL so the next pass retries them.
pub struct Backfill {
    store: LogStore,
    classifier: Arc<dyn Classifier>,
}

impl Backfill {
    pub fn new(store: LogStore, classifier: Arc<dyn Classifier>) -> Self {
        Self { store, classifier }
    }

    pub async fn categories(&self, limit: usize) -> Result<BackfillReport> {
        let batch = self.store.find_unclassified(limit).await?;
        let mut report = BackfillReport {
            total: batch.len(),
            ..Default::default()
        };

        for log in batch {
            let category = match self.classifier.classify(&log.change_digest()).await {
                Ok(category) => category,
                Err(e) => {
                    tracing::warn!("Classification failed for {}: {}", log.commit_hash, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.set_category_if_unset(&log.commit_hash, category).await {
                Ok(true) => {
                    tracing::debug!("Classified {} as {}", log.commit_hash, category);
                    report.processed += 1;
                }
                Ok(false) => {
                    tracing::debug!("{} was classified concurrently", log.commit_hash);
                }
                Err(e) => {
                    tracing::warn!("Failed to save category for {}: {}", log.commit_hash, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Classification pass: {} classified, {} failed of {}",
            report.processed,
            report.failed,
            report.total
        );
        Ok(report)
    }

    pub async fn summaries(&self, limit: usize) -> Result<BackfillReport> {
        let batch = self.store.find_unsummarized(limit).await?;
        let mut report = BackfillReport {
            total: batch.len(),
            ..Default::default()
        };

        for log in batch {
            let summary = match self
                .classifier
                .summarize(&log.commit_message, &log.repository)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!("Summary failed for {}: {}", log.commit_hash, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.set_summary_if_unset(&log.commit_hash, &summary).await {
                Ok(true) => report.processed += 1,
                Ok(false) => tracing::debug!("{} was summarized concurrently", log.commit_hash),
                Err(e) => {
                    tracing::warn!("Failed to save summary for {}: {}", log.commit_hash, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Summary pass: {} summarized, {} failed of {}",
            report.processed,
            report.failed,
            report.total
        );
        Ok(report)
    }
}
