// Core data model.
// Issue identity, fetched snapshots, analysis results, and cache entries.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LensError, Result};

/// Immutable identity of a GitHub issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub owner: String,
    pub name: String,
    pub number: u64,
}

impl IssueRef {
    /// Create a validated issue reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, number: u64) -> Result<Self> {
        let owner = owner.into().trim().to_string();
        let name = name.into().trim().to_string();

        if owner.is_empty() {
            return Err(LensError::InvalidInput("repository owner is empty".into()));
        }
        if name.is_empty() {
            return Err(LensError::InvalidInput("repository name is empty".into()));
        }
        if number == 0 {
            return Err(LensError::InvalidInput(
                "issue number must be positive".into(),
            ));
        }

        Ok(Self {
            owner,
            name,
            number,
        })
    }

    /// Build a reference from a repository URL such as `https://github.com/acme/core`.
    pub fn parse_repo_url(url: &str, number: u64) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let path = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("github.com/"))
            .ok_or_else(|| LensError::InvalidInput(format!("not a GitHub URL: {}", url)))?;

        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(repo), None) => {
                Self::new(owner, repo.trim_end_matches(".git"), number)
            }
            _ => Err(LensError::InvalidInput(format!(
                "expected https://github.com/<owner>/<repo>, got {}",
                url
            ))),
        }
    }

    /// Whether this issue lives in the given repository.
    pub fn in_repository(&self, owner: &str, name: &str) -> bool {
        self.owner.eq_ignore_ascii_case(owner) && self.name.eq_ignore_ascii_case(name)
    }

    pub fn html_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/issues/{}",
            self.owner, self.name, self.number
        )
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.name, self.number)
    }
}

/// Issue open/closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Normalized view of an issue as fetched at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueSnapshot {
    pub issue: IssueRef,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub state: IssueState,
    /// Digest of title, body and labels, computed locally.
    pub content_hash: String,
    /// Comment bodies; prompt context only, not part of the content hash.
    pub comments: Vec<String>,
    pub html_url: String,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fixed categorization vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bug,
    Feature,
    Documentation,
    Question,
    Other,
}

impl Category {
    #[cfg(test)]
    pub const ALL: [Category; 5] = [
        Category::Bug,
        Category::Feature,
        Category::Documentation,
        Category::Question,
        Category::Other,
    ];

    /// Map a model-provided label onto a known category.
    /// Returns `None` for labels outside the vocabulary.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "bug" => Some(Category::Bug),
            "feature" | "feature_request" | "enhancement" => Some(Category::Feature),
            "documentation" | "docs" => Some(Category::Documentation),
            "question" => Some(Category::Question),
            "other" => Some(Category::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bug => "bug",
            Category::Feature => "feature",
            Category::Documentation => "documentation",
            Category::Question => "question",
            Category::Other => "other",
        }
    }
}

/// Priority estimate with justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    /// 1 (low) to 5 (critical).
    pub score: u8,
    pub justification: String,
}

impl Default for PriorityScore {
    fn default() -> Self {
        Self {
            score: 3,
            justification: String::new(),
        }
    }
}

/// Categorization and summary produced for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issue: IssueRef,
    pub category: Category,
    pub summary: String,
    /// Always within [0, 1].
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub prompt_version: String,
    #[serde(default)]
    pub priority: PriorityScore,
    #[serde(default)]
    pub suggested_labels: Vec<String>,
    #[serde(default)]
    pub potential_impact: String,
    /// True when the provider response could not be parsed and a fallback was produced.
    #[serde(default)]
    pub degraded: bool,
}

/// Clamp a raw provider confidence into [0, 1]; non-finite values become 0.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

/// Opaque cache key derived from issue identity, content and prompt version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored analysis. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: AnalysisResult,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, result: AnalysisResult, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            fingerprint,
            result,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
