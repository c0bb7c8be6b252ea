use crate::config::Config;
use crate::errors::AppError;
use crate::models::{RepositoryRecord, UserRecord};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// In-flight repository detail requests per user.
pub const REPO_DETAIL_CONCURRENCY: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REPOSITORIES_TIMEOUT: Duration = Duration::from_secs(20);
const PER_PAGE: u32 = 100;
const MAX_PAGES: usize = 50;
const MAX_USERNAME_LEN: usize = 39;
const USER_AGENT: &str = concat!("devrank/", env!("CARGO_PKG_VERSION"));

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?$").unwrap());

/// Normalizes a raw username as found in lists and scraped pages.
///
/// Takes the first token before whitespace or `·`, then applies the platform's
/// login rules: alphanumerics and single inner hyphens, at most 39 characters.
pub fn clean_username(raw: &str) -> Result<String, AppError> {
    let username = raw
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('·')
        .next()
        .unwrap_or_default()
        .trim();

    if !USERNAME_RE.is_match(username) {
        return Err(AppError::BadRequest(format!(
            "invalid username format: {:?}",
            raw
        )));
    }
    if username.contains("--") {
        return Err(AppError::BadRequest(format!(
            "invalid username format (consecutive hyphens): {}",
            username
        )));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(AppError::BadRequest(format!(
            "username too long (max {} characters): {}",
            MAX_USERNAME_LEN, username
        )));
    }

    Ok(username.to_string())
}

/// Source of user and repository records.
#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn fetch_user(&self, username: &str) -> Result<UserRecord, AppError>;

    /// All repositories of `username`, most recently updated first, each
    /// enriched with its detail record, language list and the user's commit count.
    async fn fetch_repositories(&self, username: &str) -> Result<Vec<RepositoryRecord>, AppError>;
}

/// Client for the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitHubClient {
    /// Creates a new `GitHubClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.github.com`.
    /// * `token` - Personal access token sent as a bearer credential.
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create GitHub client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(config.github_api_url.clone(), config.github_token.clone())
    }

    async fn get(&self, url: &str) -> Result<Response, AppError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, AppError> {
        let response = check_status(self.get(url).await?, what).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Failed to parse {}: {}", what, e)))
    }

    async fn list_repositories(&self, username: &str) -> Result<Vec<RepositoryRecord>, AppError> {
        let mut next = Some(format!(
            "{}/users/{}/repos?type=all&sort=updated&direction=desc&per_page={}",
            self.base_url, username, PER_PAGE
        ));
        let mut repos = Vec::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            let response = check_status(self.get(&url).await?, "repository list").await?;
            next = link_url(response.headers(), "next");

            let page: Vec<RepositoryRecord> = response.json().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse repository list: {}", e))
            })?;
            repos.extend(page);

            pages += 1;
            if pages >= MAX_PAGES {
                tracing::warn!("Stopping repository pagination for {} after {} pages", username, pages);
                break;
            }
        }

        tracing::debug!("Listed {} repositories for {} in {} page(s)", repos.len(), username, pages);
        Ok(repos)
    }

    /// Fills in detail, languages and commit count. Never fails: a failed
    /// detail fetch keeps the summary record and other failures leave the
    /// field empty.
    async fn enrich_repository(&self, username: &str, summary: RepositoryRecord) -> RepositoryRecord {
        let owner = if summary.owner.login.is_empty() {
            username.to_string()
        } else {
            summary.owner.login.clone()
        };
        let repo_url = format!("{}/repos/{}/{}", self.base_url, owner, summary.name);

        let mut repo = match self.get_json::<RepositoryRecord>(&repo_url, "repository").await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!("Using summary for {}/{}: {}", owner, summary.name, e);
                summary
            }
        };

        repo.languages = match self
            .get_json::<BTreeMap<String, u64>>(&format!("{}/languages", repo_url), "languages")
            .await
        {
            Ok(languages) => languages.into_keys().collect(),
            Err(e) => {
                tracing::debug!("No languages for {}/{}: {}", owner, repo.name, e);
                Vec::new()
            }
        };

        if !repo.fork {
            repo.user_commits = self.count_user_commits(&owner, &repo.name, username).await;
        }

        repo
    }

    /// Commits authored by `author` in `owner/repo`, 0 on any failure.
    ///
    /// Requests one commit per page and reads the page count from the
    /// `rel="last"` link. An empty repository answers 409.
    pub async fn count_user_commits(&self, owner: &str, repo: &str, author: &str) -> u64 {
        let url = format!(
            "{}/repos/{}/{}/commits?author={}&per_page=1",
            self.base_url, owner, repo, author
        );

        let response = match self.get(&url).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Commit count for {}/{} failed: {}", owner, repo, e);
                return 0;
            }
        };
        if !response.status().is_success() {
            return 0;
        }

        if let Some(last) = link_url(response.headers(), "last") {
            if let Some(page) = page_number(&last) {
                return page;
            }
        }

        match response.json::<Vec<serde_json::Value>>().await {
            Ok(commits) => commits.len() as u64,
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl SourceApi for GitHubClient {
    async fn fetch_user(&self, username: &str) -> Result<UserRecord, AppError> {
        tracing::info!("Fetching user {}", username);
        let url = format!("{}/users/{}", self.base_url, username);
        self.get_json(&url, &format!("user {}", username)).await
    }

    async fn fetch_repositories(&self, username: &str) -> Result<Vec<RepositoryRecord>, AppError> {
        let work = async {
            let summaries = self.list_repositories(username).await?;
            let repos: Vec<RepositoryRecord> = stream::iter(summaries)
                .map(|summary| self.enrich_repository(username, summary))
                .buffered(REPO_DETAIL_CONCURRENCY)
                .collect()
                .await;
            Ok::<_, AppError>(repos)
        };

        tokio::time::timeout(REPOSITORIES_TIMEOUT, work)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "fetching repositories for {} exceeded {:?}",
                    username, REPOSITORIES_TIMEOUT
                ))
            })?
    }
}

/// Maps non-success statuses onto the error taxonomy. 403 and 429 are
/// treated as rate limiting; 401 means the token itself was rejected.
async fn check_status(response: Response, what: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(match status {
        StatusCode::NOT_FOUND => AppError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED => {
            AppError::Unauthorized(format!("GitHub rejected the token while fetching {}", what))
        }
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            tracing::warn!("GitHub rate limit hit while fetching {}", what);
            AppError::RateLimited(format!("{} returned {}: {}", what, status, body))
        }
        _ => AppError::ExternalApiError(format!("GitHub returned {} for {}: {}", status, what, body)),
    })
}

/// Target of the `rel` entry in a `Link` header.
fn link_url(headers: &header::HeaderMap, rel: &str) -> Option<String> {
    let value = headers.get(header::LINK)?.to_str().ok()?;
    let wanted = format!("rel=\"{}\"", rel);

    value.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        if pieces.any(|p| p.trim() == wanted) {
            Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

fn page_number(url: &str) -> Option<u64> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}
