use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devrank::ai_client::{AiClient, AiService};
use devrank::cache::MokaProfileCache;
use devrank::config::Config;
use devrank::db::Database;
use devrank::db_storage::{PgProfileStore, ProfileStore};
use devrank::enrichment::EnrichmentOrchestrator;
use devrank::github_client::GitHubClient;
use devrank::handlers::{self, AppState};
use devrank::nation::NationPredictor;
use devrank::queue::{PgWorkQueue, WorkQueue};
use devrank::worker::EvaluationWorker;

/// Main entry point for the API server.
///
/// Wires the store, cache, GitHub and AI clients and the evaluation queue,
/// optionally starts the evaluation worker in-process, and serves the API
/// until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devrank=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(db.pool.clone()));
    let queue: Arc<dyn WorkQueue> =
        Arc::new(PgWorkQueue::new(db.pool.clone(), config.evaluation_queue.clone()));
    let cache = Arc::new(MokaProfileCache::new(config.cache_max_capacity));
    tracing::info!("Profile cache initialized ({} entries max)", config.cache_max_capacity);

    let github = Arc::new(GitHubClient::from_config(&config)?);
    tracing::info!("GitHub client initialized: {}", config.github_api_url);

    let ai = AiClient::from_config(&config)?.map(|client| Arc::new(client) as Arc<dyn AiService>);

    let orchestrator = Arc::new(
        EnrichmentOrchestrator::new(
            store.clone(),
            github,
            queue.clone(),
            NationPredictor::new(ai.clone()),
        )
        .with_cache(cache),
    );

    let mut worker = match (&ai, config.run_evaluator) {
        (Some(ai), true) => {
            let mut worker = EvaluationWorker::new(store.clone(), ai.clone(), queue.clone());
            worker.start();
            Some(worker)
        }
        (None, true) => {
            tracing::warn!("RUN_EVALUATOR is set but AI_API_KEY is missing, worker not started");
            None
        }
        _ => None,
    };

    let app_state = Arc::new(AppState {
        store,
        orchestrator,
    });

    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/developers", get(handlers::search_developers))
        .route("/api/v1/developers/top", get(handlers::top_developers))
        .route("/api/v1/nations", get(handlers::list_nations))
        .route(
            "/api/v1/developers/:username",
            get(handlers::get_developer).delete(handlers::delete_developer),
        )
        .route("/api/v1/developers/id/:id", get(handlers::get_developer_by_id))
        .route(
            "/api/v1/developers/:username/enrich",
            post(handlers::enrich_developer),
        )
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    if let Some(worker) = worker.as_mut() {
        worker.stop().await;
    }

    Ok(())
}
