use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Profiles above this commit-volume proxy are considered "active".
pub const ACTIVE_COMMIT_THRESHOLD: i64 = 1000;
/// Profiles above this commit-volume proxy get the shortest cache lifetime.
pub const VERY_ACTIVE_COMMIT_THRESHOLD: i64 = 5000;

const HOUR: u64 = 60 * 60;

// ============ Stored Models ============

/// The enriched developer record. One document per username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperProfile {
    /// Generated store identifier.
    pub id: Uuid,
    /// Source-platform login. Unique and immutable once created.
    pub username: String,
    /// Display name (falls back to the login).
    pub name: String,
    pub email: String,
    /// Free-text location as entered on the source platform.
    pub location: String,
    pub avatar_url: String,
    pub profile_url: String,
    /// Languages and technologies, deduplicated and sorted.
    pub skills: Vec<String>,
    /// Repository names, deduplicated and sorted.
    pub repositories: Vec<String>,
    /// Stars received on non-fork repositories.
    pub star_count: i64,
    /// Forks received on non-fork repositories.
    pub fork_count: i64,
    /// Commit-volume proxy: summed size of non-fork repositories.
    pub commit_count: i64,
    /// Composite score in [0, 100].
    pub talent_rank: f64,
    /// Data-reliability score in [0, 100].
    pub confidence: f64,
    /// Two-letter country code, empty when unknown.
    pub nation: String,
    /// Confidence of `nation` in [0, 100].
    pub nation_confidence: f64,
    /// Set once when the document is first written.
    pub created_at: DateTime<Utc>,
    /// Set on every write, including partial updates.
    pub updated_at: DateTime<Utc>,
    /// Time of the last enrichment run.
    pub last_updated: DateTime<Utc>,
    /// Most recent repository activity seen during enrichment.
    pub last_active: Option<DateTime<Utc>>,
    /// How long an enrichment stays fresh.
    #[serde(with = "duration_secs")]
    pub update_frequency: Duration,
    pub data_validation: ValidationResult,
    /// Filled in asynchronously by the evaluation worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_evaluation: Option<TechEvaluation>,
}

impl DeveloperProfile {
    /// True while `now - last_updated` is inside the freshness window.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_updated);
        match chrono::Duration::from_std(self.update_frequency) {
            Ok(window) => age < window,
            Err(_) => false,
        }
    }
}

/// Freshness window: active profiles go stale after a day, others after a week.
pub fn update_frequency_for(commit_count: i64) -> Duration {
    if commit_count > ACTIVE_COMMIT_THRESHOLD {
        Duration::from_secs(24 * HOUR)
    } else {
        Duration::from_secs(7 * 24 * HOUR)
    }
}

/// Cache lifetime tiers, most active shortest.
pub fn cache_ttl_for(commit_count: i64) -> Duration {
    if commit_count > VERY_ACTIVE_COMMIT_THRESHOLD {
        Duration::from_secs(6 * HOUR)
    } else if commit_count > ACTIVE_COMMIT_THRESHOLD {
        Duration::from_secs(12 * HOUR)
    } else {
        Duration::from_secs(24 * HOUR)
    }
}

/// Snapshot of the validation pass run during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence: f64,
    pub last_validated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// AI-generated commentary attached by the evaluation worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechEvaluation {
    #[serde(default)]
    pub blog_url: String,
    #[serde(default)]
    pub personal_site_url: String,
    #[serde(default)]
    pub biography: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub experience: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub ai_evaluation: String,
    pub last_evaluated: Option<DateTime<Utc>>,
}

// ============ Queue Messages ============

/// Work item handed from the enrichment pipeline to the evaluation worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub username: String,
    pub profile_url: String,
    pub blog_url: String,
    /// The user's bio.
    pub description: String,
    pub repositories: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============ Derived, not persisted ============

/// Output of the nation predictor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionResult {
    /// Two-letter code, empty when there is no usable answer.
    pub nation: String,
    /// In [0, 100].
    pub confidence: f64,
    /// Human-readable names of the signals that contributed, in the order observed.
    pub factors: Vec<String>,
}

impl PredictionResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nation.is_empty()
    }
}

// ============ Source Platform Records ============

/// User record as returned by `GET /users/{username}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Display name, falling back to the login.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.login)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

/// Repository record as returned by the list and detail endpoints.
///
/// `languages` and `user_commits` are not part of the payload; the client
/// fills them in while enriching each repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub owner: RepositoryOwner,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    /// Size in KB, used as the commit-volume proxy.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub languages: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub user_commits: u64,
}

/// Serializes a `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(last_updated: DateTime<Utc>, commit_count: i64) -> DeveloperProfile {
        DeveloperProfile {
            id: Uuid::new_v4(),
            username: "octocat".to_string(),
            name: "The Octocat".to_string(),
            email: String::new(),
            location: String::new(),
            avatar_url: String::new(),
            profile_url: String::new(),
            skills: vec![],
            repositories: vec![],
            star_count: 0,
            fork_count: 0,
            commit_count,
            talent_rank: 0.0,
            confidence: 50.0,
            nation: String::new(),
            nation_confidence: 0.0,
            created_at: last_updated,
            updated_at: last_updated,
            last_updated,
            last_active: None,
            update_frequency: update_frequency_for(commit_count),
            data_validation: ValidationResult {
                is_valid: true,
                confidence: 50.0,
                last_validated: last_updated,
                issues: vec![],
            },
            tech_evaluation: None,
        }
    }

    #[test]
    fn test_update_frequency_tiers() {
        assert_eq!(update_frequency_for(1001), Duration::from_secs(24 * HOUR));
        assert_eq!(update_frequency_for(1000), Duration::from_secs(7 * 24 * HOUR));
        assert_eq!(update_frequency_for(0), Duration::from_secs(7 * 24 * HOUR));
    }

    #[test]
    fn test_cache_ttl_tiers() {
        assert_eq!(cache_ttl_for(6000), Duration::from_secs(6 * HOUR));
        assert_eq!(cache_ttl_for(1500), Duration::from_secs(12 * HOUR));
        assert_eq!(cache_ttl_for(10), Duration::from_secs(24 * HOUR));
    }

    #[test]
    fn test_active_profile_goes_stale_after_a_day() {
        let now = Utc::now();
        let p = profile(now - chrono::Duration::hours(25), 1500);
        assert!(!p.is_fresh(now));

        let p = profile(now - chrono::Duration::hours(25), 10);
        assert!(p.is_fresh(now));
    }

    #[test]
    fn test_profile_json_keeps_frequency_in_seconds() {
        let now = Utc::now();
        let p = profile(now, 10);
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["update_frequency"], serde_json::json!(7 * 24 * HOUR));
        assert!(value.get("tech_evaluation").is_none());

        let back: DeveloperProfile = serde_json::from_value(value).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_display_name_falls_back_to_login() {
        let user = UserRecord {
            login: "octocat".to_string(),
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "octocat");
    }
}
