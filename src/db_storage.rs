use crate::errors::{AppError, ResultExt};
use crate::models::{DeveloperProfile, TechEvaluation};
use crate::scoring::domain_skills;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Nation filters only match predictions at least this confident.
pub const MIN_SEARCH_NATION_CONFIDENCE: f64 = 60.0;

/// Filters for the developer search. Empty fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeveloperQuery {
    /// Matches username, name, email or location.
    pub keyword: Option<String>,
    pub name: Option<String>,
    /// One of the domains in the domain-skill table.
    pub domain: Option<String>,
    /// Two-letter codes, any of which may match.
    pub nations: Vec<String>,
    /// Any of which may match.
    pub skills: Vec<String>,
    pub min_talent_rank: Option<f64>,
    /// 1-based.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl DeveloperQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.page_size() as i64
    }

    /// Lower-cased skills a matching profile must have at least one of,
    /// coming from the domain filter. `None` when no known domain is set.
    pub fn domain_filter(&self) -> Option<Vec<String>> {
        let domain = self.domain.as_deref().filter(|d| !d.trim().is_empty())?;
        match domain_skills(domain) {
            Some(skills) => Some(skills.iter().map(|s| s.to_lowercase()).collect()),
            None => {
                tracing::debug!("Ignoring unknown domain filter {:?}", domain);
                None
            }
        }
    }

    pub fn nation_filter(&self) -> Vec<String> {
        self.nations
            .iter()
            .map(|n| n.trim().to_uppercase())
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn skill_filter(&self) -> Vec<String> {
        self.skills
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeveloperPage {
    pub items: Vec<DeveloperProfile>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Number of stored profiles per predicted nation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NationCount {
    pub nation: String,
    pub count: i64,
}

/// Document store for enriched profiles. At most one profile per username
/// (case-insensitive).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<DeveloperProfile>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeveloperProfile>, AppError>;

    /// Inserts the profile or, when the username exists, replaces it while
    /// keeping the stored `id` and `created_at`. Returns the stored document.
    async fn upsert(&self, profile: &DeveloperProfile) -> Result<DeveloperProfile, AppError>;

    /// Sets `tech_evaluation` and `updated_at` only. `NotFound` when the
    /// username has no profile.
    async fn update_tech_evaluation(
        &self,
        username: &str,
        evaluation: &TechEvaluation,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Returns whether a profile was deleted.
    async fn delete_by_username(&self, username: &str) -> Result<bool, AppError>;

    /// Filtered search sorted by talent rank, highest first.
    async fn search(&self, query: &DeveloperQuery) -> Result<DeveloperPage, AppError>;

    async fn top(&self, limit: i64) -> Result<Vec<DeveloperProfile>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    /// Distinct non-empty nations with their profile counts, most common
    /// first. Equal counts are ordered by nation code.
    async fn nations(&self) -> Result<Vec<NationCount>, AppError>;
}

/// PostgreSQL-backed profile store.
///
/// The full profile lives in the `doc` JSONB column. Fields used for
/// filtering and sorting are copied into their own columns on every write.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &DeveloperQuery) {
        builder.push(" WHERE TRUE");

        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
            let pattern = format!("%{}%", keyword.trim());
            builder.push(" AND (username ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR email ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR location ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
            builder.push(" AND name ILIKE ");
            builder.push_bind(format!("%{}%", name.trim()));
        }

        if let Some(domain_skills) = query.domain_filter() {
            builder.push(" AND EXISTS (SELECT 1 FROM unnest(skills) s WHERE lower(s) = ANY(");
            builder.push_bind(domain_skills);
            builder.push("))");
        }

        let nations = query.nation_filter();
        if !nations.is_empty() {
            builder.push(" AND nation = ANY(");
            builder.push_bind(nations);
            builder.push(") AND nation_confidence >= ");
            builder.push_bind(MIN_SEARCH_NATION_CONFIDENCE);
        }

        let skills = query.skill_filter();
        if !skills.is_empty() {
            builder.push(" AND EXISTS (SELECT 1 FROM unnest(skills) s WHERE lower(s) = ANY(");
            builder.push_bind(skills);
            builder.push("))");
        }

        if let Some(min_rank) = query.min_talent_rank {
            builder.push(" AND talent_rank >= ");
            builder.push_bind(min_rank);
        }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<DeveloperProfile>, AppError> {
        let row: Option<(Json<DeveloperProfile>,)> =
            sqlx::query_as("SELECT doc FROM developers WHERE lower(username) = lower($1)")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("loading profile {}", username))?;

        Ok(row.map(|(doc,)| doc.0))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeveloperProfile>, AppError> {
        let row: Option<(Json<DeveloperProfile>,)> =
            sqlx::query_as("SELECT doc FROM developers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("loading profile {}", id))?;

        Ok(row.map(|(doc,)| doc.0))
    }

    async fn upsert(&self, profile: &DeveloperProfile) -> Result<DeveloperProfile, AppError> {
        // On conflict the stored id and created_at win, both in the columns
        // and inside the document. A stored tech_evaluation survives unless
        // the incoming document carries its own.
        let (doc,): (Json<DeveloperProfile>,) = sqlx::query_as(
            r#"
            INSERT INTO developers (
                id, username, name, email, location, skills, talent_rank,
                nation, nation_confidence, doc, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT ((lower(username))) DO UPDATE
            SET username = EXCLUDED.username,
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                location = EXCLUDED.location,
                skills = EXCLUDED.skills,
                talent_rank = EXCLUDED.talent_rank,
                nation = EXCLUDED.nation,
                nation_confidence = EXCLUDED.nation_confidence,
                doc = EXCLUDED.doc || jsonb_build_object(
                    'id', developers.doc -> 'id',
                    'created_at', developers.doc -> 'created_at'
                ) || CASE
                    WHEN EXCLUDED.doc ? 'tech_evaluation'
                        OR NOT developers.doc ? 'tech_evaluation'
                    THEN '{}'::jsonb
                    ELSE jsonb_build_object('tech_evaluation', developers.doc -> 'tech_evaluation')
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING doc
            "#,
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.location)
        .bind(&profile.skills)
        .bind(profile.talent_rank)
        .bind(&profile.nation)
        .bind(profile.nation_confidence)
        .bind(Json(profile))
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("upserting profile {}", profile.username))?;

        tracing::debug!("Stored profile {} ({})", doc.0.username, doc.0.id);
        Ok(doc.0)
    }

    async fn update_tech_evaluation(
        &self,
        username: &str,
        evaluation: &TechEvaluation,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE developers
            SET doc = jsonb_set(
                    jsonb_set(doc, '{tech_evaluation}', $2, true),
                    '{updated_at}', $3, true
                ),
                updated_at = $4
            WHERE lower(username) = lower($1)
            "#,
        )
        .bind(username)
        .bind(Json(evaluation))
        .bind(Json(updated_at))
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving evaluation for {}", username))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("developer {}", username)));
        }
        Ok(())
    }

    async fn delete_by_username(&self, username: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM developers WHERE lower(username) = lower($1)")
            .bind(username)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting profile {}", username))?;

        Ok(result.rows_affected() > 0)
    }

    async fn search(&self, query: &DeveloperQuery) -> Result<DeveloperPage, AppError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM developers");
        Self::push_filters(&mut count_query, query);
        let (total,): (i64,) = count_query
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .context("counting search results")?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT doc FROM developers");
        Self::push_filters(&mut select, query);
        select.push(" ORDER BY talent_rank DESC, username ASC LIMIT ");
        select.push_bind(query.page_size() as i64);
        select.push(" OFFSET ");
        select.push_bind(query.offset());

        let rows: Vec<(Json<DeveloperProfile>,)> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .context("searching developers")?;

        Ok(DeveloperPage {
            items: rows.into_iter().map(|(doc,)| doc.0).collect(),
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn top(&self, limit: i64) -> Result<Vec<DeveloperProfile>, AppError> {
        let rows: Vec<(Json<DeveloperProfile>,)> = sqlx::query_as(
            "SELECT doc FROM developers ORDER BY talent_rank DESC, username ASC LIMIT $1",
        )
        .bind(limit.clamp(1, MAX_PAGE_SIZE as i64))
        .fetch_all(&self.pool)
        .await
        .context("loading top developers")?;

        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM developers")
            .fetch_one(&self.pool)
            .await
            .context("counting developers")?;
        Ok(count)
    }

    async fn nations(&self) -> Result<Vec<NationCount>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT nation, COUNT(*) AS count
            FROM developers
            WHERE nation <> ''
            GROUP BY nation
            ORDER BY count DESC, nation ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("aggregating nations")?;

        Ok(rows
            .into_iter()
            .map(|(nation, count)| NationCount { nation, count })
            .collect())
    }
}
