use crate::cache_validator::CacheEnvelope;
use crate::errors::AppError;
use crate::models::{cache_ttl_for, DeveloperProfile};
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Short-lived profile cache. Purely an optimization: callers treat every
/// error as a miss.
#[async_trait]
pub trait ProfileCache: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<DeveloperProfile>, AppError>;

    /// Stores the profile with a lifetime derived from its commit volume.
    async fn set(&self, profile: &DeveloperProfile) -> Result<(), AppError>;

    async fn invalidate(&self, username: &str) -> Result<(), AppError>;
}

pub fn cache_key(username: &str) -> String {
    format!("developer:{}", username.to_lowercase())
}

#[derive(Clone)]
struct CachedEntry {
    serialized: Arc<str>,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, CachedEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache holding checksummed profile envelopes.
#[derive(Clone)]
pub struct MokaProfileCache {
    inner: Cache<String, CachedEntry>,
}

impl MokaProfileCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryExpiry)
            .build();
        Self { inner }
    }

    /// Stores a raw value under a profile key. Lets tests plant corrupt entries.
    pub async fn insert_raw(&self, username: &str, serialized: &str, ttl: Duration) {
        self.inner
            .insert(
                cache_key(username),
                CachedEntry {
                    serialized: Arc::from(serialized),
                    ttl,
                },
            )
            .await;
    }
}

#[async_trait]
impl ProfileCache for MokaProfileCache {
    async fn get(&self, username: &str) -> Result<Option<DeveloperProfile>, AppError> {
        let key = cache_key(username);
        let Some(entry) = self.inner.get(&key).await else {
            return Ok(None);
        };

        match CacheEnvelope::deserialize_and_validate(&entry.serialized) {
            Some(envelope) => Ok(Some(envelope.profile)),
            None => {
                self.inner.invalidate(&key).await;
                Ok(None)
            }
        }
    }

    async fn set(&self, profile: &DeveloperProfile) -> Result<(), AppError> {
        let envelope = CacheEnvelope::seal(profile.clone(), Utc::now())?;
        let ttl = cache_ttl_for(profile.commit_count);
        self.insert_raw(&profile.username, &envelope.serialize()?, ttl)
            .await;
        tracing::debug!("Cached {} for {:?}", profile.username, ttl);
        Ok(())
    }

    async fn invalidate(&self, username: &str) -> Result<(), AppError> {
        self.inner.invalidate(&cache_key(username)).await;
        Ok(())
    }
}
