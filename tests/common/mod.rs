//! In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devrank::ai_client::{AiService, ChatMessage};
use devrank::cache::ProfileCache;
use devrank::db_storage::{DeveloperPage, DeveloperQuery, NationCount, ProfileStore};
use devrank::errors::AppError;
use devrank::github_client::SourceApi;
use devrank::models::{
    update_frequency_for, DeveloperProfile, EvaluationTask, RepositoryOwner, RepositoryRecord,
    TechEvaluation, UserRecord, ValidationResult,
};
use devrank::queue::WorkQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

// ============ Store ============

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<Vec<DeveloperProfile>>,
    pub upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    pub fn count_username(&self, username: &str) -> usize {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.username.eq_ignore_ascii_case(username))
            .count()
    }

    pub fn insert(&self, profile: DeveloperProfile) {
        self.profiles.lock().unwrap().push(profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<DeveloperProfile>, AppError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeveloperProfile>, AppError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn upsert(&self, profile: &DeveloperProfile) -> Result<DeveloperProfile, AppError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut profiles = self.profiles.lock().unwrap();
        match profiles
            .iter_mut()
            .find(|p| p.username.eq_ignore_ascii_case(&profile.username))
        {
            Some(stored) => {
                let mut next = profile.clone();
                next.id = stored.id;
                next.created_at = stored.created_at;
                if next.tech_evaluation.is_none() {
                    next.tech_evaluation = stored.tech_evaluation.clone();
                }
                *stored = next.clone();
                Ok(next)
            }
            None => {
                profiles.push(profile.clone());
                Ok(profile.clone())
            }
        }
    }

    async fn update_tech_evaluation(
        &self,
        username: &str,
        evaluation: &TechEvaluation,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        let stored = profiles
            .iter_mut()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .ok_or_else(|| AppError::NotFound(format!("profile {}", username)))?;
        stored.tech_evaluation = Some(evaluation.clone());
        stored.updated_at = updated_at;
        Ok(())
    }

    async fn delete_by_username(&self, username: &str) -> Result<bool, AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        let before = profiles.len();
        profiles.retain(|p| !p.username.eq_ignore_ascii_case(username));
        Ok(profiles.len() != before)
    }

    async fn search(&self, query: &DeveloperQuery) -> Result<DeveloperPage, AppError> {
        let mut items: Vec<DeveloperProfile> = self.profiles.lock().unwrap().clone();
        items.sort_by(|a, b| b.talent_rank.total_cmp(&a.talent_rank));
        let total = items.len() as i64;
        let items = items
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .collect();
        Ok(DeveloperPage {
            items,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn top(&self, limit: i64) -> Result<Vec<DeveloperProfile>, AppError> {
        let mut items: Vec<DeveloperProfile> = self.profiles.lock().unwrap().clone();
        items.sort_by(|a, b| b.talent_rank.total_cmp(&a.talent_rank));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.len() as i64)
    }

    async fn nations(&self) -> Result<Vec<NationCount>, AppError> {
        let mut counts = std::collections::BTreeMap::<String, i64>::new();
        for p in self.profiles.lock().unwrap().iter() {
            if !p.nation.is_empty() {
                *counts.entry(p.nation.clone()).or_default() += 1;
            }
        }
        let mut nations: Vec<NationCount> = counts
            .into_iter()
            .map(|(nation, count)| NationCount { nation, count })
            .collect();
        // BTreeMap order is by code; a stable sort keeps it among equal counts
        nations.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(nations)
    }
}

// ============ Source ============

pub struct FakeSource {
    pub user: UserRecord,
    pub repos: Vec<RepositoryRecord>,
    pub user_error: Option<AppError>,
    pub delay: Duration,
    pub user_calls: AtomicUsize,
    pub repo_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(user: UserRecord, repos: Vec<RepositoryRecord>) -> Self {
        Self {
            user,
            repos,
            user_error: None,
            delay: Duration::ZERO,
            user_calls: AtomicUsize::new(0),
            repo_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: AppError) -> Self {
        let mut source = Self::new(UserRecord::default(), vec![]);
        source.user_error = Some(error);
        source
    }

    pub fn calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst) + self.repo_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn fetch_user(&self, _username: &str) -> Result<UserRecord, AppError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.user_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.user.clone()),
        }
    }

    async fn fetch_repositories(&self, _username: &str) -> Result<Vec<RepositoryRecord>, AppError> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.repos.clone())
    }
}

// ============ AI ============

pub struct FakeAi {
    pub reply: Result<String, AppError>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeAi {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(AppError::ExternalApiError("AI API returned 500".to_string())),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiService for FakeAi {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages);
        self.reply.clone()
    }
}

// ============ Failing infrastructure ============

pub struct BrokenCache;

#[async_trait]
impl ProfileCache for BrokenCache {
    async fn get(&self, _username: &str) -> Result<Option<DeveloperProfile>, AppError> {
        Err(AppError::InternalError("cache unavailable".to_string()))
    }

    async fn set(&self, _profile: &DeveloperProfile) -> Result<(), AppError> {
        Err(AppError::InternalError("cache unavailable".to_string()))
    }

    async fn invalidate(&self, _username: &str) -> Result<(), AppError> {
        Err(AppError::InternalError("cache unavailable".to_string()))
    }
}

#[derive(Default)]
pub struct BrokenQueue {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl WorkQueue for BrokenQueue {
    async fn publish(&self, _task: &EvaluationTask) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::InternalError("queue unavailable".to_string()))
    }

    async fn try_pop(&self) -> Result<Option<EvaluationTask>, AppError> {
        Ok(None)
    }

    async fn wait_for_task(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============ Fixtures ============

pub fn user(login: &str) -> UserRecord {
    UserRecord {
        login: login.to_string(),
        name: Some("Test Developer".to_string()),
        html_url: Some(format!("https://github.com/{}", login)),
        blog: Some("https://blog.example.com".to_string()),
        bio: Some("Builds compilers".to_string()),
        followers: 50,
        ..Default::default()
    }
}

pub fn repo(owner: &str, name: &str, stars: u64, size: u64, language: &str) -> RepositoryRecord {
    RepositoryRecord {
        name: name.to_string(),
        full_name: format!("{}/{}", owner, name),
        owner: RepositoryOwner {
            login: owner.to_string(),
        },
        stargazers_count: stars,
        forks_count: stars / 10,
        size,
        language: Some(language.to_string()),
        languages: vec![language.to_string()],
        updated_at: Some(Utc::now()),
        user_commits: 20,
        ..Default::default()
    }
}

/// A stored profile as an earlier enrichment would have left it.
pub fn stored_profile(username: &str, nation: &str, talent_rank: f64) -> DeveloperProfile {
    let now = Utc::now();
    DeveloperProfile {
        id: Uuid::new_v4(),
        username: username.to_string(),
        name: username.to_string(),
        email: String::new(),
        location: String::new(),
        avatar_url: String::new(),
        profile_url: format!("https://github.com/{}", username),
        skills: vec!["Rust".to_string()],
        repositories: vec!["compiler".to_string()],
        star_count: 10,
        fork_count: 1,
        commit_count: 300,
        talent_rank,
        confidence: 60.0,
        nation: nation.to_string(),
        nation_confidence: if nation.is_empty() { 0.0 } else { 100.0 },
        created_at: now,
        updated_at: now,
        last_updated: now,
        last_active: Some(now),
        update_frequency: update_frequency_for(300),
        data_validation: ValidationResult {
            is_valid: true,
            confidence: 60.0,
            last_validated: now,
            issues: vec![],
        },
        tech_evaluation: None,
    }
}
