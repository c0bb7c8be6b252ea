/// Per-username enrichment pipeline.
///
/// 1. Return a cached or still-fresh stored profile untouched
/// 2. Fetch the user record and repository list concurrently
/// 3. Aggregate skills, repository names and fork-excluded sums
/// 4. Score talent, confidence and nation
/// 5. Persist with a single upsert
/// 6. Publish an evaluation task and refresh the cache (both best-effort)
use crate::ai_client::DeveloperFacts;
use crate::cache::ProfileCache;
use crate::db_storage::ProfileStore;
use crate::errors::{AppError, ResultExt};
use crate::github_client::{clean_username, SourceApi};
use crate::models::{
    update_frequency_for, DeveloperProfile, EvaluationTask, RepositoryRecord, UserRecord,
};
use crate::nation::NationPredictor;
use crate::queue::WorkQueue;
use crate::scoring::{self, DeveloperMetrics, RepositoryAggregates};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Deadline for the concurrent user and repository fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EnrichmentOrchestrator {
    store: Arc<dyn ProfileStore>,
    source: Arc<dyn SourceApi>,
    queue: Arc<dyn WorkQueue>,
    cache: Option<Arc<dyn ProfileCache>>,
    nation: NationPredictor,
    fetch_timeout: Duration,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        source: Arc<dyn SourceApi>,
        queue: Arc<dyn WorkQueue>,
        nation: NationPredictor,
    ) -> Self {
        Self {
            store,
            source,
            queue,
            cache: None,
            nation,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ProfileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn enrich(&self, raw_username: &str) -> Result<DeveloperProfile, AppError> {
        self.enrich_at(raw_username, Utc::now()).await
    }

    /// Runs the pipeline as of `now`.
    ///
    /// Source errors (not found, rate limit, timeout) are returned as-is so
    /// the caller can pick a back-off. Cache and queue failures are logged
    /// and never fail the call.
    pub async fn enrich_at(
        &self,
        raw_username: &str,
        now: DateTime<Utc>,
    ) -> Result<DeveloperProfile, AppError> {
        let username = clean_username(raw_username)?;

        if let Some(cached) = self.cached(&username, now).await {
            tracing::debug!("Cache hit for {}", username);
            return Ok(cached);
        }

        let existing = self
            .store
            .find_by_username(&username)
            .await
            .with_context(|| format!("checking stored profile for {}", username))?;

        if let Some(profile) = existing.as_ref().filter(|p| p.is_fresh(now)) {
            tracing::debug!("Stored profile for {} is fresh, skipping fetch", username);
            return Ok(profile.clone());
        }

        tracing::info!("Enriching {}", username);

        let (user, repos) = tokio::time::timeout(self.fetch_timeout, async {
            tokio::try_join!(
                self.source.fetch_user(&username),
                self.source.fetch_repositories(&username)
            )
        })
        .await
        .map_err(|_| AppError::Timeout(format!("fetching {} from source", username)))??;

        let profile = self
            .build_profile(&user, &repos, existing.as_ref(), now)
            .await;

        let stored = self
            .store
            .upsert(&profile)
            .await
            .with_context(|| format!("storing profile for {}", username))?;

        tracing::info!(
            username = %stored.username,
            talent_rank = stored.talent_rank,
            nation = %stored.nation,
            "Profile enriched"
        );

        let task = EvaluationTask {
            username: stored.username.clone(),
            profile_url: stored.profile_url.clone(),
            blog_url: user.blog.clone().unwrap_or_default(),
            description: user.bio.clone().unwrap_or_default(),
            repositories: stored.repositories.clone(),
            created_at: now,
        };
        match self.queue.publish(&task).await {
            Ok(()) => tracing::debug!("Queued evaluation for {}", stored.username),
            Err(e) => tracing::warn!(
                "Failed to queue evaluation for {}: {}",
                stored.username,
                e
            ),
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&stored).await {
                tracing::warn!("Failed to cache {}: {}", stored.username, e);
            }
        }

        Ok(stored)
    }

    /// Deletes the stored profile and drops its cache entry, so the next
    /// enrichment rebuilds it from the source. Returns whether a stored
    /// profile existed.
    pub async fn delete(&self, raw_username: &str) -> Result<bool, AppError> {
        let username = clean_username(raw_username)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&username).await {
                tracing::warn!("Failed to evict {} from cache: {}", username, e);
            }
        }

        self.store
            .delete_by_username(&username)
            .await
            .with_context(|| format!("deleting profile {}", username))
    }

    async fn cached(&self, username: &str, now: DateTime<Utc>) -> Option<DeveloperProfile> {
        let cache = self.cache.as_ref()?;
        match cache.get(username).await {
            Ok(Some(profile)) if profile.is_fresh(now) => Some(profile),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}, using store: {}", username, e);
                None
            }
        }
    }

    async fn build_profile(
        &self,
        user: &UserRecord,
        repos: &[RepositoryRecord],
        existing: Option<&DeveloperProfile>,
        now: DateTime<Utc>,
    ) -> DeveloperProfile {
        let skills = collect_skills(repos);
        let repositories = collect_repository_names(repos);
        let agg = RepositoryAggregates::collect(repos);
        let last_active = scoring::last_active(repos);

        let metrics = DeveloperMetrics::build(user, repos, &skills, now);
        let talent_rank = scoring::talent_rank(&metrics);

        let location = user.location.clone().unwrap_or_default();
        let confidence = scoring::generic_confidence(
            agg.commit_count,
            agg.star_count,
            user.followers as i64,
            !location.trim().is_empty(),
        );

        let facts = DeveloperFacts {
            username: user.login.clone(),
            name: user.display_name().to_string(),
            bio: user.bio.clone().unwrap_or_default(),
            location: location.clone(),
            email: user.email.clone().unwrap_or_default(),
            company: user.company.clone().unwrap_or_default(),
            profile_url: user.html_url.clone().unwrap_or_default(),
            blog_url: user.blog.clone().unwrap_or_default(),
            skills: skills.clone(),
            repositories: repositories.clone(),
            star_count: agg.star_count,
            fork_count: agg.fork_count,
            commit_count: agg.commit_count,
            followers: user.followers as i64,
            last_active: last_active.map(|t| t.to_rfc3339()),
        };
        let prediction = self.nation.predict(user, repos, &facts).await;
        if prediction.is_empty() {
            tracing::debug!("No nation prediction for {}", user.login);
        }

        let data_validation = scoring::validate(
            &user.login,
            agg.star_count,
            agg.commit_count,
            last_active,
            confidence,
            now,
        );

        DeveloperProfile {
            id: existing.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            username: user.login.clone(),
            name: user.display_name().to_string(),
            email: user.email.clone().unwrap_or_default(),
            location,
            avatar_url: user.avatar_url.clone().unwrap_or_default(),
            profile_url: user
                .html_url
                .clone()
                .unwrap_or_else(|| format!("https://github.com/{}", user.login)),
            skills,
            repositories,
            star_count: agg.star_count,
            fork_count: agg.fork_count,
            commit_count: agg.commit_count,
            talent_rank,
            confidence,
            nation: prediction.nation,
            nation_confidence: prediction.confidence,
            created_at: existing.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            last_updated: now,
            last_active,
            update_frequency: update_frequency_for(agg.commit_count),
            data_validation,
            tech_evaluation: existing.and_then(|p| p.tech_evaluation.clone()),
        }
    }
}

/// Primary and secondary languages of every repository, deduplicated and
/// sorted. Forks count here: using a language is a skill even in a fork.
pub fn collect_skills(repos: &[RepositoryRecord]) -> Vec<String> {
    repos
        .iter()
        .flat_map(|r| r.language.iter().chain(r.languages.iter()))
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn collect_repository_names(repos: &[RepositoryRecord]) -> Vec<String> {
    repos
        .iter()
        .map(|r| r.name.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
