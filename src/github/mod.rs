// GitHub API module.
// Provides the issue fetcher used by the orchestrator and its HTTP client.

pub mod client;
pub mod endpoints;
pub mod types;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::model::{IssueRef, IssueSnapshot};

pub use client::GitHubClient;
use types::RateLimit;

/// Credential and request budget of a fetcher, as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetcherStatus {
    pub authenticated: bool,
    pub rate_limit: RateLimit,
}

/// Source of live issue snapshots.
#[async_trait]
pub trait IssueFetcher: Send + Sync {
    /// Fetch the current state of `issue`, with its content hash computed locally.
    ///
    /// Fails with `RateLimited`, `Unauthorized`, `NotFound` or `UpstreamUnavailable`.
    async fn fetch(&self, issue: &IssueRef) -> Result<IssueSnapshot>;

    /// Budget reported by the upstream, if it reports one.
    fn status(&self) -> Option<FetcherStatus> {
        None
    }
}
