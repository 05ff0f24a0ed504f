//! GitHub REST implementation of [`ReviewHost`]

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::comments::{ApiReviewComment, ApiUser};
use super::{CheckStatus, HostError, IssueComment, PrInfo, ReviewHost, issues_from_comments};
use crate::config::GithubConfig;
use crate::domain::{PrRef, ReviewIssue};

const PER_PAGE: u32 = 100;
const MAX_PAGES: usize = 50;
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ApiBranch {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
    repo: Option<ApiRepo>,
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    title: String,
    state: String,
    mergeable: Option<bool>,
    head: ApiBranch,
    base: ApiBranch,
}

#[derive(Debug, Deserialize)]
struct ApiCheckRun {
    status: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCheckRuns {
    total_count: usize,
    check_runs: Vec<ApiCheckRun>,
}

#[derive(Debug, Deserialize)]
struct ApiIssueComment {
    id: u64,
    user: Option<ApiUser>,
    #[serde(default)]
    body: String,
}

/// Extract the `rel="next"` URL from a Link header
pub(crate) fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (url, rel) = part.split_once(';')?;
        rel.contains("rel=\"next\"")
            .then(|| url.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

/// Check conclusions that count as failures
fn is_failed_conclusion(conclusion: Option<&str>) -> bool {
    matches!(
        conclusion,
        Some("failure") | Some("timed_out") | Some("cancelled") | Some("action_required")
    )
}

/// GitHub API client
pub struct GithubClient {
    http: Client,
    api_url: String,
    token: String,
    ignore_authors: Vec<String>,
}

impl GithubClient {
    pub fn from_config(config: &GithubConfig) -> Result<Self, HostError> {
        debug!(api_url = %config.api_url, "GithubClient::from_config: called");
        let token = config
            .token()
            .ok_or_else(|| HostError::Auth(format!("set {} or GH_TOKEN", config.token_env)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("resolvd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            ignore_authors: config.ignore_authors.clone(),
        })
    }

    /// Token for authenticated clones
    pub fn token(&self) -> &str {
        &self.token
    }

    fn repo_url(&self, pr: &PrRef, rest: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, pr.owner, pr.repo, rest)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, HostError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(HostError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HostError> {
        debug!(%url, "GithubClient::get_json: called");
        let response = Self::check(self.authed(self.http.get(url)).send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| HostError::InvalidResponse(e.to_string()))
    }

    /// Follow Link headers until the last page
    async fn get_paginated<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>, HostError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                break;
            }
            debug!(%url, pages, "GithubClient::get_paginated: fetching page");
            let response = Self::check(self.authed(self.http.get(&url)).send().await?).await?;
            next = response
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: Vec<T> = response
                .json()
                .await
                .map_err(|e| HostError::InvalidResponse(e.to_string()))?;
            items.extend(page);
        }
        Ok(items)
    }
}

#[async_trait]
impl ReviewHost for GithubClient {
    async fn pr_info(&self, pr: &PrRef) -> Result<PrInfo, HostError> {
        debug!(%pr, "GithubClient::pr_info: called");
        let pull: ApiPull = self.get_json(&self.repo_url(pr, &format!("pulls/{}", pr.number))).await?;
        let clone_url = pull
            .head
            .repo
            .map(|r| r.clone_url)
            .ok_or_else(|| HostError::InvalidResponse("head repository was deleted".to_string()))?;
        Ok(PrInfo {
            title: pull.title,
            head_ref: pull.head.name,
            head_sha: pull.head.sha,
            base_ref: pull.base.name,
            mergeable: pull.mergeable,
            state: pull.state,
            clone_url,
        })
    }

    async fn review_comments(&self, pr: &PrRef) -> Result<Vec<ReviewIssue>, HostError> {
        debug!(%pr, "GithubClient::review_comments: called");
        let url = self.repo_url(pr, &format!("pulls/{}/comments?per_page={}", pr.number, PER_PAGE));
        let comments: Vec<ApiReviewComment> = self.get_paginated(url).await?;
        let issues = issues_from_comments(comments, &self.ignore_authors);
        info!(%pr, count = issues.len(), "Fetched review comments");
        Ok(issues)
    }

    async fn check_status(&self, pr: &PrRef, sha: &str) -> Result<CheckStatus, HostError> {
        debug!(%pr, %sha, "GithubClient::check_status: called");
        let runs: ApiCheckRuns = self
            .get_json(&self.repo_url(pr, &format!("commits/{}/check-runs?per_page={}", sha, PER_PAGE)))
            .await?;
        Ok(CheckStatus {
            total: runs.total_count,
            completed: runs.check_runs.iter().filter(|r| r.status == "completed").count(),
            failed: runs
                .check_runs
                .iter()
                .filter(|r| is_failed_conclusion(r.conclusion.as_deref()))
                .count(),
        })
    }

    async fn issue_comments(&self, pr: &PrRef) -> Result<Vec<IssueComment>, HostError> {
        debug!(%pr, "GithubClient::issue_comments: called");
        let url = self.repo_url(pr, &format!("issues/{}/comments?per_page={}", pr.number, PER_PAGE));
        let comments: Vec<ApiIssueComment> = self.get_paginated(url).await?;
        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                id: c.id,
                author: c.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
                body: c.body,
            })
            .collect())
    }

    async fn post_issue_comment(&self, pr: &PrRef, body: &str) -> Result<(), HostError> {
        debug!(%pr, "GithubClient::post_issue_comment: called");
        let url = self.repo_url(pr, &format!("issues/{}/comments", pr.number));
        let request = self.authed(self.http.post(&url)).json(&serde_json::json!({ "body": body }));
        Self::check(request.send().await?).await?;
        info!(%pr, "Posted summary comment");
        Ok(())
    }

    async fn file_at_ref(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<Option<String>, HostError> {
        debug!(%pr, %path, %git_ref, "GithubClient::file_at_ref: called");
        let url = self.repo_url(pr, &format!("contents/{}", path));
        let response = self
            .authed(self.http.get(&url))
            .header("Accept", "application/vnd.github.raw")
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.text().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_link() {
        let header = r#"<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=5>; rel="last""#;
        assert_eq!(next_link(header).as_deref(), Some("https://api.github.com/x?page=2"));

        let last = r#"<https://api.github.com/x?page=1>; rel="prev""#;
        assert_eq!(next_link(last), None);
    }

    #[test]
    fn test_failed_conclusions() {
        assert!(is_failed_conclusion(Some("failure")));
        assert!(is_failed_conclusion(Some("timed_out")));
        assert!(!is_failed_conclusion(Some("success")));
        assert!(!is_failed_conclusion(Some("skipped")));
        assert!(!is_failed_conclusion(None));
    }

    #[test]
    fn test_pull_payload_decodes() {
        let pull: ApiPull = serde_json::from_str(
            r#"{"title": "Add widget", "state": "open", "mergeable": null,
                "head": {"ref": "feat", "sha": "abc", "repo": {"clone_url": "https://github.com/o/r.git"}},
                "base": {"ref": "main", "sha": "def", "repo": null}}"#,
        )
        .unwrap();
        assert_eq!(pull.head.name, "feat");
        assert_eq!(pull.mergeable, None);
        assert_eq!(pull.base.name, "main");
    }
}
