use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backfill::{Backfill, BackfillReport};
use crate::classifier::{Classifier, SUMMARY_FALLBACK};
use crate::config::clamp_batch;
use crate::error::SyncError;
use crate::models::{parse_commit_date, Category, LearningLog};
use crate::store::LogStore;
use crate::sync::SyncOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub store: LogStore,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub backfill: Arc<Backfill>,
    pub classifier: Arc<dyn Classifier>,
    pub backfill_limit: usize,
    pub classify_after_sync: bool,
    pub sync_lock: Arc<tokio::sync::Mutex<()>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", post(sync_logs))
        .route("/classify", post(classify_logs))
        .route("/summaries", post(summarize_logs))
        .route("/logs", get(list_logs))
        .route("/summarize", post(summarize_commit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
    pub username: Option<String>,
    pub since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: String,
    pub message: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_failed: Option<usize>,
}

async fn sync_logs(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, (StatusCode, String)> {
    let since = params
        .since
        .as_deref()
        .map(parse_commit_date)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let _guard = state
        .sync_lock
        .try_lock()
        .map_err(|_| (StatusCode::CONFLICT, SyncError::AlreadyRunning.to_string()))?;

    let report = state
        .orchestrator
        .sync(params.username.as_deref(), since)
        .await
        .map_err(|e| {
            tracing::error!("Sync failed: {}", e);
            let status = match e {
                SyncError::Authentication(_) => StatusCode::UNAUTHORIZED,
                SyncError::AlreadyRunning => StatusCode::CONFLICT,
            };
            (status, e.to_string())
        })?;

    let (classified, classification_failed) = if state.classify_after_sync {
        match state.backfill.categories(state.backfill_limit).await {
            Ok(r) => (Some(r.processed), Some(r.failed)),
            Err(e) => {
                tracing::error!("Classification after sync failed: {}", e);
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    Ok(Json(SyncResponse {
        status: "success".to_string(),
        message: format!(
            "Processed {} commits, skipped {} existing commits, failed {} commits",
            report.processed, report.skipped, report.failed
        ),
        processed: report.processed,
        skipped: report.skipped,
        failed: report.failed,
        classified,
        classification_failed,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct BackfillParams {
    pub limit: Option<usize>,
}

async fn classify_logs(
    State(state): State<AppState>,
    Query(params): Query<BackfillParams>,
) -> Result<Json<BackfillReport>, (StatusCode, String)> {
    let limit = clamp_batch(params.limit.unwrap_or(state.backfill_limit));
    state
        .backfill
        .categories(limit)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn summarize_logs(
    State(state): State<AppState>,
    Query(params): Query<BackfillParams>,
) -> Result<Json<BackfillReport>, (StatusCode, String)> {
    let limit = clamp_batch(params.limit.unwrap_or(state.backfill_limit));
    state
        .backfill
        .summaries(limit)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub category: Option<String>,
}

async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<LearningLog>>, (StatusCode, String)> {
    let logs = match params.category.as_deref() {
        Some(raw) => {
            let category: Category = raw
                .parse()
                .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
            state.store.list_by_category(category).await
        }
        None => state.store.list_all().await,
    };

    logs.map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub commit_message: String,
    pub repository: String,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

async fn summarize_commit(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> Json<SummarizeResponse> {
    let summary = match state
        .classifier
        .summarize(&request.commit_message, &request.repository)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!("Summary generation failed: {}", e);
            SUMMARY_FALLBACK.to_string()
        }
    };

    Json(SummarizeResponse { summary })
}
