// GitHub API HTTP client.
// Handles authentication, rate limit tracking, and status classification.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use tracing::{debug, warn};

use crate::config::GitHubConfig;
use crate::error::{LensError, Result};
use crate::retry::RetryPolicy;

use super::types::RateLimit;

const GITHUB_API_VERSION: &str = "2022-11-28";

/// GitHub API client with optional authentication and rate limit tracking.
pub struct GitHubClient {
    client: Client,
    api_base: String,
    authenticated: bool,
    rate_limit: Mutex<RateLimit>,
    pub(super) retry: RetryPolicy,
    pub(super) max_comments: u32,
}

impl GitHubClient {
    /// Create a new GitHub client. Without a token, requests are anonymous.
    pub fn new(config: &GitHubConfig, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| LensError::Config(format!("invalid GitHub token: {}", e)))?,
            );
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-lens"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LensError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            authenticated: token.is_some(),
            rate_limit: Mutex::new(RateLimit::default()),
            retry: config.retry.clone(),
            max_comments: config.max_comments,
        })
    }

    /// Create a client using the GITHUB_TOKEN environment variable when present.
    pub fn from_env(config: &GitHubConfig) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!("GITHUB_TOKEN not set; using anonymous GitHub requests with lower rate limits");
        }
        Self::new(config, token.as_deref())
    }

    /// Snapshot of the most recently observed rate limit headers.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Make a GET request to the GitHub API.
    pub async fn get(&self, endpoint: &str) -> Result<Response> {
        self.get_with_params::<[(&str, &str)]>(endpoint, &[]).await
    }

    /// Make a GET request with query parameters.
    pub async fn get_with_params<T: serde::Serialize + ?Sized>(
        &self,
        endpoint: &str,
        params: &T,
    ) -> Result<Response> {
        let url = format!("{}{}", self.api_base, endpoint);
        let response = self.client.get(&url).query(params).send().await?;

        let rate_limit = self.update_rate_limit(&response);
        debug!(
            endpoint,
            status = response.status().as_u16(),
            remaining = rate_limit.remaining,
            "GitHub response"
        );
        self.check_response(response, &rate_limit).await
    }

    /// Update rate limit from response headers and return the new value.
    fn update_rate_limit(&self, response: &Response) -> RateLimit {
        let headers = response.headers();
        let mut guard = match self.rate_limit.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(limit) = header_u64(headers, "x-ratelimit-limit") {
            guard.limit = limit;
        }
        if let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") {
            guard.remaining = remaining;
        }
        if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
            guard.reset = reset;
        }
        guard.clone()
    }

    /// Check response status and convert errors.
    async fn check_response(
        &self,
        response: Response,
        rate_limit: &RateLimit,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after =
            header_u64(response.headers(), RETRY_AFTER.as_str()).map(Duration::from_secs);
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            status,
            rate_limit,
            retry_after,
            chrono::Utc::now().timestamp().max(0) as u64,
            &url,
            &body,
        ))
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map a non-success GitHub status onto the error taxonomy.
///
/// GitHub signals primary rate limits with 403 + `x-ratelimit-remaining: 0`
/// and secondary limits with 403/429 + `retry-after`.
pub(crate) fn classify_status(
    status: StatusCode,
    rate_limit: &RateLimit,
    retry_after: Option<Duration>,
    now_epoch: u64,
    url: &str,
    body: &str,
) -> LensError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (retry_after.is_some()
                || rate_limit.is_exhausted()
                || body.to_ascii_lowercase().contains("rate limit")));

    if rate_limited {
        let retry_after = retry_after.or_else(|| rate_limit.wait_from(now_epoch));
        return LensError::RateLimited { retry_after };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LensError::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => LensError::NotFound(url.to_string()),
        s if s.is_server_error() => LensError::UpstreamUnavailable(format!("GitHub HTTP {}", s)),
        // Validation and other client errors repeat on every attempt.
        s => LensError::InvalidResponse(format!(
            "GitHub HTTP {}: {}",
            s,
            body.chars().take(200).collect::<String>()
        )),
    }
}
