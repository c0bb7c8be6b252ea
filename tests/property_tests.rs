/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use chrono::{Duration, TimeZone, Utc};
use devrank::ai_client::parse_response;
use devrank::github_client::clean_username;
use devrank::models::{RepositoryOwner, RepositoryRecord};
use devrank::nation::{extract_nation, quick_confidence};
use devrank::scoring::{
    generic_confidence, project_importance, talent_rank, ActivityMetrics, ContributionMetrics,
    DeveloperMetrics, ExpertiseMetrics, InfluenceMetrics, ProjectMetrics,
};
use proptest::prelude::*;

fn arb_repo() -> impl Strategy<Value = RepositoryRecord> {
    (
        0u64..1_000_000,
        0u64..100_000,
        0u64..10_000_000,
        any::<bool>(),
        any::<bool>(),
        0i64..1_000,
    )
        .prop_map(|(stars, forks, size, archived, fork, age_days)| RepositoryRecord {
            name: "repo".to_string(),
            owner: RepositoryOwner {
                login: "octocat".to_string(),
            },
            stargazers_count: stars,
            forks_count: forks,
            size,
            archived,
            fork,
            updated_at: Some(reference_now() - Duration::days(age_days)),
            ..Default::default()
        })
}

fn reference_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn arb_metrics() -> impl Strategy<Value = DeveloperMetrics> {
    (
        (any::<i64>(), any::<i64>(), any::<i64>(), any::<i64>(), any::<f64>()),
        (any::<i64>(), any::<i64>(), 0usize..1000, 0usize..1000, any::<f64>()),
        (any::<i64>(), any::<f64>(), any::<f64>()),
        (any::<f64>(), any::<f64>(), any::<f64>()),
        (0usize..40, 0usize..12, any::<f64>()),
    )
        .prop_map(|(c, p, i, a, e)| DeveloperMetrics {
            contributions: ContributionMetrics {
                commit_count: c.0,
                pr_count: c.1,
                review_count: c.2,
                issue_count: c.3,
                quality: c.4,
            },
            projects: ProjectMetrics {
                star_count: p.0,
                fork_count: p.1,
                total_count: p.2,
                core_projects: p.3,
                quality: p.4,
            },
            influence: InfluenceMetrics {
                followers: i.0,
                recognition: i.1,
                reach: i.2,
            },
            activity: ActivityMetrics {
                frequency: a.0,
                consistency: a.1,
                growth: a.2,
            },
            expertise: ExpertiseMetrics {
                languages: vec!["Rust".to_string(); e.0],
                domains: vec!["backend".to_string(); e.1],
                depth: e.2,
            },
        })
}

proptest! {
    #[test]
    fn project_importance_is_bounded(repos in prop::collection::vec(arb_repo(), 0..20)) {
        let score = project_importance(&repos, reference_now());
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn project_importance_grows_with_stars(
        mut repos in prop::collection::vec(arb_repo(), 1..10),
        extra in 0u64..1_000_000,
    ) {
        repos[0].fork = false;
        let before = project_importance(&repos, reference_now());
        repos[0].stargazers_count += extra;
        let after = project_importance(&repos, reference_now());
        prop_assert!(after >= before);
    }

    #[test]
    fn talent_rank_is_bounded(metrics in arb_metrics()) {
        let rank = talent_rank(&metrics);
        prop_assert!((0.0..=100.0).contains(&rank));
    }

    #[test]
    fn generic_confidence_is_bounded(
        commits in any::<i64>(),
        stars in any::<i64>(),
        followers in any::<i64>(),
        has_location in any::<bool>(),
    ) {
        let c = generic_confidence(commits, stars, followers, has_location);
        prop_assert!((50.0..=100.0).contains(&c));
    }

    #[test]
    fn quick_confidence_is_a_percentage(score in 0.0f64..100.0, factors in 0usize..20) {
        let c = quick_confidence(score, factors);
        prop_assert!((30.0..=100.0).contains(&c));
    }
}

proptest! {
    #[test]
    fn parse_response_never_panics(text in "\\PC*") {
        let parsed = parse_response(&text);
        prop_assert!((0.0..=100.0).contains(&parsed.confidence));
    }

    #[test]
    fn plain_text_becomes_the_evaluation(text in "[a-zA-Z ]{1,80}") {
        let parsed = parse_response(&text);
        prop_assert!(parsed.specialties.is_empty());
        prop_assert!(parsed.experience.is_empty());
        prop_assert_eq!(parsed.evaluation, text.trim().to_string());
    }

    #[test]
    fn extract_nation_never_panics(location in "\\PC*") {
        if let Some(code) = extract_nation(&location) {
            prop_assert_eq!(code.len(), 2);
        }
    }

    #[test]
    fn cleaned_usernames_are_valid_logins(raw in "\\PC{0,60}") {
        if let Ok(name) = clean_username(&raw) {
            prop_assert!(!name.is_empty() && name.len() <= 39);
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
            prop_assert!(!name.starts_with('-') && !name.ends_with('-'));
        }
    }
}
