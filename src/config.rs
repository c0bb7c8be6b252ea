use crate::batch::DEFAULT_BATCH_WIDTH;
use serde::Deserialize;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_AI_API_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEFAULT_AI_MODEL: &str = "deepseek-chat";
pub const DEFAULT_QUEUE_NAME: &str = "developer_evaluation";

/// Upper bound on the batch driver's worker pool.
pub const MAX_CRAWL_CONCURRENCY: usize = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub github_token: String,
    pub github_api_url: String,
    pub ai_api_key: Option<String>, // AI fallback and evaluation are disabled without it
    pub ai_api_url: String,
    pub ai_model: String,
    pub evaluation_queue: String,
    pub cache_max_capacity: u64,
    pub crawl_concurrency: usize,
    pub run_evaluator: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            github_token: std::env::var("GITHUB_TOKEN")
                .map_err(|_| anyhow::anyhow!("GITHUB_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("GITHUB_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            github_api_url: std::env::var("GITHUB_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("GITHUB_API_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })
                .transpose()?
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            ai_api_key: std::env::var("AI_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            ai_api_url: std::env::var("AI_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AI_API_URL.to_string()),
            ai_model: std::env::var("AI_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            evaluation_queue: std::env::var("EVALUATION_QUEUE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            cache_max_capacity: std::env::var("CACHE_MAX_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CACHE_MAX_CAPACITY must be a positive number"))?,
            crawl_concurrency: std::env::var("CRAWL_CONCURRENCY")
                .unwrap_or_else(|_| DEFAULT_BATCH_WIDTH.to_string())
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("CRAWL_CONCURRENCY must be a positive number"))?
                .clamp(1, MAX_CRAWL_CONCURRENCY),
            run_evaluator: std::env::var("RUN_EVALUATOR")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("GitHub API URL: {}", config.github_api_url);
        if config.ai_api_key.is_none() {
            tracing::warn!("AI_API_KEY not set, AI nation fallback and evaluation are disabled");
        } else {
            tracing::debug!("AI endpoint: {} (model {})", config.ai_api_url, config.ai_model);
        }
        tracing::debug!("Evaluation queue: {}", config.evaluation_queue);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
