use crate::db_storage::{DeveloperPage, DeveloperQuery, NationCount, ProfileStore, MAX_PAGE_SIZE};
use crate::enrichment::EnrichmentOrchestrator;
use crate::errors::AppError;
use crate::github_client::clean_username;
use crate::models::DeveloperProfile;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_TOP_LIMIT: i64 = 10;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProfileStore>,
    pub orchestrator: Arc<EnrichmentOrchestrator>,
}

/// Query string of `GET /api/v1/developers`. List filters are comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub keyword: Option<String>,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub nations: Option<String>,
    pub skills: Option<String>,
    pub min_talent_rank: Option<f64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl From<SearchParams> for DeveloperQuery {
    fn from(params: SearchParams) -> Self {
        Self {
            nations: split_list(params.nations.as_deref()),
            skills: split_list(params.skills.as_deref()),
            keyword: params.keyword.filter(|k| !k.trim().is_empty()),
            name: params.name.filter(|n| !n.trim().is_empty()),
            domain: params.domain,
            min_talent_rank: params.min_talent_rank,
            page: params.page,
            page_size: params.page_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TopParams {
    pub limit: Option<i64>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.count().await {
        Ok(developers) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "devrank",
                "version": env!("CARGO_PKG_VERSION"),
                "developers": developers
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "devrank",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}

/// GET /api/v1/developers
///
/// Filtered search, highest talent rank first.
pub async fn search_developers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<DeveloperPage>, AppError> {
    tracing::info!("GET /developers - params: {:?}", params);

    if let Some(rank) = params.min_talent_rank {
        if !(0.0..=100.0).contains(&rank) {
            return Err(AppError::BadRequest(
                "min_talent_rank must be between 0 and 100".to_string(),
            ));
        }
    }

    let page = state.store.search(&params.into()).await?;
    Ok(Json(page))
}

/// GET /api/v1/developers/top
pub async fn top_developers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopParams>,
) -> Result<Json<Vec<DeveloperProfile>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TOP_LIMIT)
        .clamp(1, MAX_PAGE_SIZE as i64);
    let developers = state.store.top(limit).await?;
    Ok(Json(developers))
}

/// GET /api/v1/nations
///
/// Predicted nations with their profile counts, most common first.
pub async fn list_nations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NationCount>>, AppError> {
    let nations = state.store.nations().await?;
    Ok(Json(nations))
}

/// GET /api/v1/developers/:username
pub async fn get_developer(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<DeveloperProfile>, AppError> {
    let username = clean_username(&username)?;
    let profile = state
        .store
        .find_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Developer {} not found", username)))?;
    Ok(Json(profile))
}

/// GET /api/v1/developers/id/:id
pub async fn get_developer_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeveloperProfile>, AppError> {
    let profile = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Developer {} not found", id)))?;
    Ok(Json(profile))
}

/// POST /api/v1/developers/:username/enrich
///
/// Runs the enrichment pipeline. A profile still inside its freshness
/// window is returned without touching the source platform.
pub async fn enrich_developer(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<DeveloperProfile>, AppError> {
    tracing::info!("POST /developers/{}/enrich", username);
    let profile = state.orchestrator.enrich(&username).await?;
    Ok(Json(profile))
}

/// DELETE /api/v1/developers/:username
///
/// Removes a stale profile, cached copy included, so the next enrichment
/// recreates it.
pub async fn delete_developer(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    let username = clean_username(&username)?;
    if state.orchestrator.delete(&username).await? {
        tracing::info!("Deleted profile {}", username);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Developer {} not found", username)))
    }
}
