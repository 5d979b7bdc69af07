use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod backfill;
mod classifier;
mod config;
mod error;
mod filter;
mod models;
mod routes;
mod source;
mod store;
mod sync;

#[cfg(test)]
mod testing;

use backfill::Backfill;
use classifier::{Classifier, DisabledClassifier, OpenAiClassifier};
use config::{Config, SourceConfig};
use filter::RepositoryFilter;
use routes::AppState;
use source::{CommitSource, GitHubSource, LocalGitSource};
use store::LogStore;
use sync::SyncOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = LogStore::connect(&config.database_url).await?;
    tracing::info!("Connected to database, {} learning logs stored", store.count().await?);

    let source: Arc<dyn CommitSource> = match &config.source {
        SourceConfig::GitHub { token, api_url } => {
            tracing::info!("Reading commits from {}", api_url);
            Arc::new(GitHubSource::new(api_url, token)?)
        }
        SourceConfig::Local { root, author } => {
            tracing::info!("Reading commits from local clones under {:?}", root);
            Arc::new(LocalGitSource::new(root.clone(), author.clone()))
        }
    };

    let classifier: Arc<dyn Classifier> = match &config.classifier {
        Some(classifier_config) => Arc::new(OpenAiClassifier::new(classifier_config)?),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, classification is disabled");
            Arc::new(DisabledClassifier)
        }
    };

    let filter = RepositoryFilter::new(config.excluded_repos.iter().cloned());
    tracing::info!("Excluding {} repositories", filter.len());

    let state = AppState {
        store: store.clone(),
        orchestrator: Arc::new(SyncOrchestrator::new(
            source,
            filter,
            store.clone(),
            config.files_changed_mode,
        )),
        backfill: Arc::new(Backfill::new(store, classifier.clone())),
        classifier,
        backfill_limit: config.backfill_limit,
        classify_after_sync: config.classify_after_sync,
        sync_lock: Arc::new(tokio::sync::Mutex::new(())),
    };

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Learning log service listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
