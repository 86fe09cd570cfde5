// GitHub API endpoint functions.
// Fetches issues and comments and normalizes them into snapshots.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::fingerprint::content_hash;
use crate::model::{IssueRef, IssueSnapshot};

use super::{FetcherStatus, IssueFetcher};
use super::client::GitHubClient;
use super::types::{Comment, Issue, Label};

impl GitHubClient {
    /// Get a single issue.
    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let response = self
            .get(&format!("/repos/{}/{}/issues/{}", owner, repo, number))
            .await?;
        let issue: Issue = response.json().await?;
        Ok(issue)
    }

    /// Get the first page of comments for an issue.
    pub async fn get_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        per_page: u32,
    ) -> Result<Vec<Comment>> {
        let params = [("per_page", per_page.to_string())];
        let response = self
            .get_with_params(
                &format!("/repos/{}/{}/issues/{}/comments", owner, repo, number),
                &params,
            )
            .await?;
        let comments: Vec<Comment> = response.json().await?;
        Ok(comments)
    }

    /// Comments are prompt context only; failures degrade to an empty list.
    async fn comments_best_effort(&self, issue: &IssueRef) -> Vec<String> {
        if self.max_comments == 0 {
            return Vec::new();
        }
        match self
            .get_issue_comments(&issue.owner, &issue.name, issue.number, self.max_comments)
            .await
        {
            Ok(comments) => comments
                .into_iter()
                .filter_map(|c| c.body)
                .filter(|b| !b.trim().is_empty())
                .take(self.max_comments as usize)
                .collect(),
            Err(err) => {
                warn!(issue = %issue, error = %err, "failed to fetch comments");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl IssueFetcher for GitHubClient {
    #[instrument(skip(self, issue), fields(issue = %issue))]
    async fn fetch(&self, issue: &IssueRef) -> Result<IssueSnapshot> {
        let raw = self
            .retry
            .run("github.issue", move || {
                self.get_issue(&issue.owner, &issue.name, issue.number)
            })
            .await?;
        if raw.pull_request.is_some() {
            debug!(number = raw.number, "issue number refers to a pull request");
        }
        let comments = self.comments_best_effort(issue).await;
        Ok(normalize(issue.clone(), raw, comments))
    }

    fn status(&self) -> Option<FetcherStatus> {
        Some(FetcherStatus {
            authenticated: self.is_authenticated(),
            rate_limit: self.rate_limit(),
        })
    }
}

/// Convert a raw GitHub issue into a snapshot with a locally computed content hash.
pub fn normalize(issue: IssueRef, raw: Issue, comments: Vec<String>) -> IssueSnapshot {
    let title = raw.title.trim().to_string();
    let body = raw.body.unwrap_or_default().replace("\r\n", "\n");
    let labels: BTreeSet<String> = raw
        .labels
        .iter()
        .map(Label::name)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let content_hash = content_hash(&title, &body, &labels);
    let html_url = if raw.html_url.is_empty() {
        issue.html_url()
    } else {
        raw.html_url
    };

    IssueSnapshot {
        issue,
        title,
        body,
        labels,
        state: raw.state,
        content_hash,
        comments,
        html_url,
        author: raw.user.map(|u| u.login),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    }
}
