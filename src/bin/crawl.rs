//! Batch enrichment of a list of GitHub users.
//!
//! Usage:
//!   crawl --users torvalds,octocat --concurrency 5
//!
//! Reads the same environment as the API server (DATABASE_URL, GITHUB_TOKEN,
//! AI_API_KEY, ...). Each username is retried per the retry policy; one
//! failing user never stops the rest of the batch.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devrank::ai_client::{AiClient, AiService};
use devrank::batch::{parse_usernames, run_batch, BatchOutcome};
use devrank::cache::MokaProfileCache;
use devrank::config::Config;
use devrank::db::Database;
use devrank::db_storage::PgProfileStore;
use devrank::enrichment::EnrichmentOrchestrator;
use devrank::github_client::GitHubClient;
use devrank::nation::NationPredictor;
use devrank::queue::PgWorkQueue;
use devrank::retry::RetryPolicy;

#[derive(Parser, Debug)]
#[command(name = "crawl")]
#[command(about = "Enrich a batch of GitHub users")]
#[command(version)]
struct Args {
    /// GitHub usernames, comma separated
    #[arg(long)]
    users: String,

    /// Number of concurrent workers (1-6). Defaults to CRAWL_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per username before giving up
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devrank=info,crawl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let usernames = parse_usernames(&args.users);
    if usernames.is_empty() {
        anyhow::bail!("--users must name at least one GitHub user");
    }

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;

    let ai = AiClient::from_config(&config)?.map(|client| Arc::new(client) as Arc<dyn AiService>);
    let orchestrator = Arc::new(
        EnrichmentOrchestrator::new(
            Arc::new(PgProfileStore::new(db.pool.clone())),
            Arc::new(GitHubClient::from_config(&config)?),
            Arc::new(PgWorkQueue::new(db.pool.clone(), config.evaluation_queue.clone())),
            NationPredictor::new(ai),
        )
        .with_cache(Arc::new(MokaProfileCache::new(config.cache_max_capacity))),
    );

    let width = args.concurrency.unwrap_or(config.crawl_concurrency);
    let policy = RetryPolicy::default().with_max_attempts(args.max_attempts);

    let report = run_batch(orchestrator, usernames, width, policy).await;

    if args.json {
        let out = serde_json::to_string_pretty(&report).context("rendering report")?;
        println!("{}", out);
    } else {
        for entry in &report.entries {
            match &entry.outcome {
                BatchOutcome::Enriched {
                    talent_rank,
                    nation,
                } => {
                    let nation = if nation.is_empty() { "-" } else { nation.as_str() };
                    println!("{:<39}  rank {:>6.2}  nation {}", entry.username, talent_rank, nation);
                }
                BatchOutcome::Failed { kind, error } => {
                    println!("{:<39}  FAILED ({}): {}", entry.username, kind, error);
                }
            }
        }
        println!(
            "\n{} enriched, {} failed",
            report.succeeded(),
            report.failed()
        );
    }

    Ok(())
}
