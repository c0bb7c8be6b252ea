//! Stand-alone evaluation worker.
//!
//! Consumes the evaluation queue and attaches AI technical evaluations to
//! stored profiles. Several instances may share one queue. Ctrl-C stops the
//! worker after the task in flight completes.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devrank::ai_client::AiClient;
use devrank::config::Config;
use devrank::db::Database;
use devrank::db_storage::PgProfileStore;
use devrank::queue::PgWorkQueue;
use devrank::worker::EvaluationWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devrank=debug,evaluator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let ai = AiClient::from_config(&config)?
        .ok_or_else(|| anyhow::anyhow!("AI_API_KEY environment variable required"))?;

    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;

    let queue = Arc::new(PgWorkQueue::new(
        db.pool.clone(),
        config.evaluation_queue.clone(),
    ));
    tracing::info!("Evaluator running on queue {}", queue.name());

    let mut worker = EvaluationWorker::new(
        Arc::new(PgProfileStore::new(db.pool.clone())),
        Arc::new(ai),
        queue,
    );
    worker.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down evaluator...");
    worker.stop().await;

    Ok(())
}
