/// Pure scoring functions over already-collected repository and user facts.
///
/// Nothing here touches the network or the store. Counts are log-scaled
/// against fixed reference magnitudes so a single viral repository cannot
/// dominate a score.
use crate::models::{RepositoryRecord, UserRecord, ValidationResult};
use chrono::{DateTime, Duration, Utc};

const MAX_SCORE: f64 = 100.0;

/// Repositories updated within this window get the recency bonus.
const RECENT_UPDATE_DAYS: i64 = 180;
const RECENCY_BONUS: f64 = 1.2;
const PROJECT_IMPORTANCE_CEILING: f64 = 10.0;

// Fixed sub-scores the source platform gives us no signal for.
const DEFAULT_CONTRIBUTION_QUALITY: f64 = 0.8;
const DEFAULT_CONSISTENCY: f64 = 0.8;
const DEFAULT_DEPTH: f64 = 0.8;

// Validator thresholds.
const MIN_STARS: i64 = 5;
const MIN_CONTRIBUTIONS: i64 = 10;
const MAX_INACTIVE_DAYS: i64 = 365;

/// Technology domains and the skills that place a developer in them.
pub const DOMAIN_SKILLS: &[(&str, &[&str])] = &[
    (
        "backend",
        &[
            "Go", "Java", "Python", "Ruby", "PHP", "C++", "C#", "Node.js", "Rust", "Scala",
            "Kotlin", "Spring", "Django", "Laravel", "Express",
        ],
    ),
    (
        "frontend",
        &[
            "JavaScript", "TypeScript", "React", "Vue", "Angular", "HTML", "CSS", "Svelte",
            "Next.js", "Nuxt.js", "Webpack", "Sass", "Less", "TailwindCSS",
        ],
    ),
    (
        "mobile",
        &[
            "Swift", "Kotlin", "Java", "Objective-C", "Flutter", "React Native", "Android",
            "iOS", "Xamarin", "Dart",
        ],
    ),
    (
        "ai",
        &[
            "Python", "TensorFlow", "PyTorch", "Jupyter Notebook", "R", "Scikit-learn",
            "Pandas", "NumPy", "CUDA", "OpenCV",
        ],
    ),
    (
        "devops",
        &[
            "Docker", "Kubernetes", "Jenkins", "Ansible", "Terraform", "Shell", "AWS", "Azure",
            "GCP", "GitLab", "CircleCI", "Prometheus", "Grafana", "Dockerfile", "HCL",
        ],
    ),
    (
        "database",
        &[
            "SQL", "MongoDB", "Redis", "PostgreSQL", "MySQL", "Oracle", "Cassandra",
            "Elasticsearch", "PLpgSQL", "TSQL",
        ],
    ),
    (
        "security",
        &[
            "Python", "C", "Assembly", "Shell", "Ruby", "Go", "Metasploit", "Wireshark",
            "Burp Suite",
        ],
    ),
    (
        "blockchain",
        &[
            "Solidity", "Go", "JavaScript", "Rust", "C++", "Web3.js", "Ethereum",
            "Smart Contracts",
        ],
    ),
    (
        "gamedev",
        &[
            "C++", "C#", "Unity", "Unreal Engine", "JavaScript", "OpenGL", "DirectX", "Vulkan",
            "SDL", "SFML", "GDScript", "ShaderLab",
        ],
    ),
    (
        "embedded",
        &[
            "C", "C++", "Assembly", "Arduino", "Raspberry Pi", "RTOS", "ARM", "IoT",
        ],
    ),
    (
        "systems",
        &[
            "C", "C++", "Rust", "Go", "Assembly", "Linux", "Windows", "Kernel", "Drivers",
        ],
    ),
];

/// Skills belonging to a domain, or `None` for an unknown domain name.
pub fn domain_skills(domain: &str) -> Option<&'static [&'static str]> {
    let domain = domain.trim().to_lowercase();
    DOMAIN_SKILLS
        .iter()
        .find(|(name, _)| *name == domain)
        .map(|(_, skills)| *skills)
}

/// Domains covered by at least one of the given skills, in table order.
pub fn domains_for_skills(skills: &[String]) -> Vec<&'static str> {
    DOMAIN_SKILLS
        .iter()
        .filter(|(_, domain)| {
            skills
                .iter()
                .any(|s| domain.iter().any(|d| d.eq_ignore_ascii_case(s)))
        })
        .map(|(name, _)| *name)
        .collect()
}

// ============ Metrics ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionMetrics {
    pub commit_count: i64,
    pub pr_count: i64,
    pub review_count: i64,
    pub issue_count: i64,
    /// PR quality multiplier in [0, 1].
    pub quality: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectMetrics {
    pub star_count: i64,
    pub fork_count: i64,
    pub total_count: usize,
    pub core_projects: usize,
    /// `project_importance` of the repository set.
    pub quality: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfluenceMetrics {
    pub followers: i64,
    /// `contribution_level` of the repository set.
    pub recognition: f64,
    pub reach: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityMetrics {
    pub frequency: f64,
    pub consistency: f64,
    pub growth: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpertiseMetrics {
    pub languages: Vec<String>,
    pub domains: Vec<String>,
    pub depth: f64,
}

/// Inputs to `talent_rank`, one block per weighted component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeveloperMetrics {
    pub contributions: ContributionMetrics,
    pub projects: ProjectMetrics,
    pub influence: InfluenceMetrics,
    pub activity: ActivityMetrics,
    pub expertise: ExpertiseMetrics,
}

/// Aggregates collected from a user's repositories. Forks are excluded from
/// the star, fork and commit-volume sums.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryAggregates {
    pub star_count: i64,
    pub fork_count: i64,
    pub commit_count: i64,
    pub original_count: usize,
}

impl RepositoryAggregates {
    pub fn collect(repos: &[RepositoryRecord]) -> Self {
        repos
            .iter()
            .filter(|r| !r.fork)
            .fold(Self::default(), |mut acc, repo| {
                acc.star_count += repo.stargazers_count as i64;
                acc.fork_count += repo.forks_count as i64;
                acc.commit_count += repo.size as i64;
                acc.original_count += 1;
                acc
            })
    }
}

impl DeveloperMetrics {
    /// Assembles the metric blocks for a freshly fetched user.
    pub fn build(
        user: &UserRecord,
        repos: &[RepositoryRecord],
        skills: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let agg = RepositoryAggregates::collect(repos);

        Self {
            contributions: ContributionMetrics {
                commit_count: agg.commit_count,
                quality: DEFAULT_CONTRIBUTION_QUALITY,
                ..Default::default()
            },
            projects: ProjectMetrics {
                star_count: agg.star_count,
                fork_count: agg.fork_count,
                total_count: repos.len(),
                core_projects: agg.original_count,
                quality: project_importance(repos, now),
            },
            influence: InfluenceMetrics {
                followers: user.followers as i64,
                recognition: contribution_level(&user.login, repos),
                reach: 0.0,
            },
            activity: ActivityMetrics {
                frequency: activity_frequency(agg.commit_count),
                consistency: DEFAULT_CONSISTENCY,
                growth: growth_trend(agg.commit_count),
            },
            expertise: ExpertiseMetrics {
                languages: skills.to_vec(),
                domains: domains_for_skills(skills)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                depth: DEFAULT_DEPTH,
            },
        }
    }
}

// ============ Scores ============

/// `log1p(value) / log1p(reference)`, zero for non-positive input.
fn log_normalized(value: i64, reference: f64) -> f64 {
    if value <= 0 {
        return 0.0;
    }
    (value as f64).ln_1p() / reference.ln_1p()
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Composite talent score in [0, 100].
pub fn talent_rank(metrics: &DeveloperMetrics) -> f64 {
    let total = (contribution_score(&metrics.contributions) * 0.25
        + project_score(&metrics.projects) * 0.25
        + influence_score(&metrics.influence) * 0.20
        + activity_score(&metrics.activity) * 0.15
        + expertise_score(&metrics.expertise) * 0.15)
        * MAX_SCORE;

    non_negative(total).min(MAX_SCORE)
}

fn contribution_score(c: &ContributionMetrics) -> f64 {
    let commits = log_normalized(c.commit_count, 10_000.0);
    let prs = log_normalized(c.pr_count, 1_000.0) * non_negative(c.quality);
    let reviews = log_normalized(c.review_count, 500.0);
    let issues = log_normalized(c.issue_count, 1_000.0);

    commits * 0.4 + prs * 0.3 + reviews * 0.2 + issues * 0.1
}

fn project_score(p: &ProjectMetrics) -> f64 {
    let stars = log_normalized(p.star_count, 100_000.0);
    let forks = log_normalized(p.fork_count, 10_000.0);
    let core = if p.total_count > 0 {
        p.core_projects as f64 / p.total_count as f64
    } else {
        0.0
    };

    stars * 0.35 + forks * 0.25 + core * 0.25 + non_negative(p.quality) * 0.15
}

fn influence_score(i: &InfluenceMetrics) -> f64 {
    let followers = log_normalized(i.followers, 10_000.0);
    followers * 0.4 + non_negative(i.recognition) * 0.35 + non_negative(i.reach) * 0.25
}

fn activity_score(a: &ActivityMetrics) -> f64 {
    non_negative(a.frequency) * 0.35
        + non_negative(a.consistency) * 0.35
        + non_negative(a.growth) * 0.3
}

fn expertise_score(e: &ExpertiseMetrics) -> f64 {
    let breadth = (e.languages.len() as f64 / 10.0).min(1.0);
    let domains = (e.domains.len() as f64 / 5.0).min(1.0);
    breadth * 0.3 + domains * 0.3 + non_negative(e.depth) * 0.4
}

pub fn activity_frequency(commit_count: i64) -> f64 {
    non_negative(commit_count as f64 / 1000.0).min(1.0)
}

pub fn growth_trend(commit_count: i64) -> f64 {
    non_negative(commit_count as f64 / 500.0).min(1.0)
}

/// Mean per-repository importance over non-fork repositories, in [0, 1].
///
/// Each repository scores `2·log10(stars) + 1.5·log10(forks) + 0.3·log10(size)`
/// (a term is skipped when its count is zero), boosted by 1.2 when it was
/// updated within 180 days of `now` and is not archived.
pub fn project_importance(repos: &[RepositoryRecord], now: DateTime<Utc>) -> f64 {
    let recent_cutoff = now - Duration::days(RECENT_UPDATE_DAYS);
    let mut total = 0.0;
    let mut counted = 0usize;

    for repo in repos.iter().filter(|r| !r.fork) {
        let mut score = 0.0;
        if repo.stargazers_count > 0 {
            score += (repo.stargazers_count as f64).log10() * 2.0;
        }
        if repo.forks_count > 0 {
            score += (repo.forks_count as f64).log10() * 1.5;
        }
        if repo.size > 0 {
            score += (repo.size as f64).log10() * 0.3;
        }

        let recent = repo.updated_at.is_some_and(|t| t > recent_cutoff);
        if recent && !repo.archived {
            score *= RECENCY_BONUS;
        }

        total += score;
        counted += 1;
    }

    if counted == 0 {
        return 0.0;
    }
    non_negative(total / counted as f64 / PROJECT_IMPORTANCE_CEILING).min(1.0)
}

/// How much of the user's own work shows up in their non-fork repositories, in [0, 1].
///
/// Only repositories with at least one commit authored by `username` count.
/// Ownership multiplies a repository's score by 1.5 and popular repositories
/// get a log-dampened star bonus.
pub fn contribution_level(username: &str, repos: &[RepositoryRecord]) -> f64 {
    let mut total = 0.0;
    let mut counted = 0usize;

    for repo in repos.iter().filter(|r| !r.fork && r.user_commits > 0) {
        let mut score = (repo.user_commits as f64).log10() * 2.0;

        if repo.owner.login.eq_ignore_ascii_case(username) {
            score *= 1.5;
        }

        let mut quality = repo.stargazers_count as f64 / 100.0;
        if quality > 1.0 {
            quality = 1.0 + quality.log10();
        }
        score *= 1.0 + quality;

        total += score;
        counted += 1;
    }

    if counted == 0 {
        return 0.0;
    }
    non_negative(total / (counted as f64 * 10.0)).min(1.0)
}

/// Data-reliability score in [0, 100]: a base of 50 for having a profile at
/// all, plus evidence from volume, stars, followers and a stated location.
pub fn generic_confidence(commits: i64, stars: i64, followers: i64, has_location: bool) -> f64 {
    let base = 0.5;
    let contribution = non_negative(commits as f64 / 1000.0).min(0.3);
    let star = non_negative(stars as f64 / 10_000.0).min(0.1);
    let follower = non_negative(followers as f64 / 1000.0).min(0.1);
    let location = if has_location { 0.1 } else { 0.0 };

    ((base + contribution + star + follower + location) * MAX_SCORE).min(MAX_SCORE)
}

/// Most recent repository update, if any repository reports one.
pub fn last_active(repos: &[RepositoryRecord]) -> Option<DateTime<Utc>> {
    repos.iter().filter_map(|r| r.updated_at).max()
}

/// Flags thin or stale profiles. The profile is valid when no issue is raised.
pub fn validate(
    username: &str,
    star_count: i64,
    commit_count: i64,
    last_active: Option<DateTime<Utc>>,
    confidence: f64,
    now: DateTime<Utc>,
) -> ValidationResult {
    let mut issues = Vec::new();

    if username.trim().is_empty() {
        issues.push("username is empty".to_string());
    }
    if star_count < MIN_STARS {
        issues.push(format!("fewer than {} stars", MIN_STARS));
    }
    if commit_count < MIN_CONTRIBUTIONS {
        issues.push(format!("fewer than {} contributions", MIN_CONTRIBUTIONS));
    }
    let inactive = match last_active {
        Some(t) => now.signed_duration_since(t) > Duration::days(MAX_INACTIVE_DAYS),
        None => true,
    };
    if inactive {
        issues.push(format!("no activity in the last {} days", MAX_INACTIVE_DAYS));
    }

    ValidationResult {
        is_valid: issues.is_empty(),
        confidence,
        last_validated: now,
        issues,
    }
}
