use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS developers (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        skills TEXT[] NOT NULL DEFAULT '{}',
        talent_rank DOUBLE PRECISION NOT NULL DEFAULT 0,
        nation TEXT NOT NULL DEFAULT '',
        nation_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
        doc JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS developers_username_key ON developers ((lower(username)))",
    "CREATE INDEX IF NOT EXISTS developers_talent_rank_idx ON developers (talent_rank DESC)",
    "CREATE INDEX IF NOT EXISTS developers_nation_idx ON developers (nation, nation_confidence)",
    "CREATE INDEX IF NOT EXISTS developers_skills_idx ON developers USING GIN (skills)",
    r#"
    CREATE TABLE IF NOT EXISTS evaluation_tasks (
        id BIGSERIAL PRIMARY KEY,
        queue TEXT NOT NULL,
        payload JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS evaluation_tasks_queue_idx ON evaluation_tasks (queue, id)",
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates tables and indexes if they are missing. Safe to run on every start.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        ensure_schema(&self.pool).await
    }
}

pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema ready");
    Ok(())
}
