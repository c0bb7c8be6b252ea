//! Batch driver: enriches many usernames through a fixed pool of workers
//! pulling from one shared channel.

use crate::config::MAX_CRAWL_CONCURRENCY;
use crate::enrichment::EnrichmentOrchestrator;
use crate::errors::ErrorKind;
use crate::retry::{with_retry, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub const DEFAULT_BATCH_WIDTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Enriched { talent_rank: f64, nation: String },
    Failed { kind: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub username: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Per-username results in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchOutcome::Enriched { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

/// Splits a comma separated username list, dropping blanks and duplicates
/// while keeping the first-seen order.
pub fn parse_usernames(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(u.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Enriches every username with `width` workers (clamped to 1..=6).
///
/// A username that still fails after the retry policy is recorded in the
/// report and the batch carries on. Returns once every worker has drained
/// the channel.
pub async fn run_batch(
    orchestrator: Arc<EnrichmentOrchestrator>,
    usernames: Vec<String>,
    width: usize,
    policy: RetryPolicy,
) -> BatchReport {
    let width = width.clamp(1, MAX_CRAWL_CONCURRENCY);
    let total = usernames.len();

    tracing::info!("Starting batch of {} usernames with {} workers", total, width);

    let (tx, rx) = mpsc::channel::<(usize, String)>(width * 2);
    let rx = Arc::new(Mutex::new(rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, BatchEntry)>();

    let mut workers = Vec::with_capacity(width);
    for worker_id in 0..width {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let orchestrator = orchestrator.clone();
        let policy = policy.clone();

        workers.push(tokio::spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some((index, username)) = next else {
                    break;
                };

                tracing::debug!(worker_id, "Picked up {}", username);
                let entry = enrich_one(&orchestrator, &policy, username).await;
                if result_tx.send((index, entry)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for item in usernames.into_iter().enumerate() {
        if tx.send(item).await.is_err() {
            tracing::error!("Batch workers exited early");
            break;
        }
    }
    drop(tx);

    let mut results = Vec::with_capacity(total);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Batch worker panicked: {}", e);
        }
    }

    results.sort_by_key(|(index, _)| *index);
    let report = BatchReport {
        entries: results.into_iter().map(|(_, entry)| entry).collect(),
    };

    tracing::info!(
        "Batch finished: {} enriched, {} failed",
        report.succeeded(),
        report.failed()
    );
    report
}

async fn enrich_one(
    orchestrator: &EnrichmentOrchestrator,
    policy: &RetryPolicy,
    username: String,
) -> BatchEntry {
    let what = format!("enriching {}", username);
    let name = username.as_str();
    let outcome = match with_retry(policy, &what, move || orchestrator.enrich(name)).await {
        Ok(profile) => BatchOutcome::Enriched {
            talent_rank: profile.talent_rank,
            nation: profile.nation,
        },
        Err(e) => {
            tracing::warn!("Giving up on {}: {}", username, e);
            BatchOutcome::Failed {
                kind: kind_label(e.kind()).to_string(),
                error: e.to_string(),
            }
        }
    };

    BatchEntry { username, outcome }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::RateLimited => "rate_limited",
        ErrorKind::Transient => "transient",
        ErrorKind::Malformed => "malformed",
        ErrorKind::Fatal => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usernames_drops_blanks_and_duplicates() {
        assert_eq!(
            parse_usernames(" torvalds, ,octocat,Torvalds,gaearon "),
            vec!["torvalds", "octocat", "gaearon"]
        );
        assert!(parse_usernames(" , ").is_empty());
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport {
            entries: vec![
                BatchEntry {
                    username: "a".to_string(),
                    outcome: BatchOutcome::Enriched {
                        talent_rank: 10.0,
                        nation: String::new(),
                    },
                },
                BatchEntry {
                    username: "b".to_string(),
                    outcome: BatchOutcome::Failed {
                        kind: "not_found".to_string(),
                        error: "Not found: b".to_string(),
                    },
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }
}
