// GitHub API response types.
// Defines structs for deserializing the issue endpoints.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::IssueState;

/// GitHub user (issue author or commenter).
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

/// Issue label. GitHub returns either objects or bare strings depending on endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Named { name: String },
    Bare(String),
}

impl Label {
    pub fn name(&self) -> &str {
        match self {
            Label::Named { name } => name,
            Label::Bare(name) => name,
        }
    }
}

/// GitHub issue as returned by `GET /repos/{owner}/{repo}/issues/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub html_url: String,
    pub user: Option<User>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is actually a pull request.
    pub pull_request: Option<serde_json::Value>,
}

/// Issue comment.
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub body: Option<String>,
}

/// Rate limit information from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Reset time as a unix epoch.
    pub reset: u64,
}

impl RateLimit {
    /// True once headers have been observed and the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.remaining == 0
    }

    /// Time until reset relative to `now_epoch`, if a reset is known.
    pub fn wait_from(&self, now_epoch: u64) -> Option<Duration> {
        (self.reset > 0).then(|| Duration::from_secs(self.reset.saturating_sub(now_epoch)))
    }
}
