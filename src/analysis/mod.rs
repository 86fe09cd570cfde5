// Issue analysis module.
// Renders the versioned prompt, calls the completion provider, and turns output into results.

pub mod gemini;
pub mod parse;
pub mod prompt;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::error::{LensError, Result};
use crate::model::{AnalysisResult, Category, IssueSnapshot, PriorityScore};
use crate::retry::RetryPolicy;

pub use gemini::GeminiClient;
use parse::{ParsedAnalysis, StructuredAnalysis, parse_response};

const MAX_DEGRADED_SUMMARY_CHARS: usize = 500;

/// Produces an analysis for a snapshot.
#[async_trait]
pub trait IssueAnalyzer: Send + Sync {
    /// Version of the prompt template; part of every cache key.
    fn prompt_version(&self) -> &str;

    /// Analyze one issue. Fails with `RateLimited`, `Unauthorized` or `UpstreamUnavailable`;
    /// output that cannot be parsed yields a degraded result instead.
    async fn analyze(&self, snapshot: &IssueSnapshot) -> Result<AnalysisResult>;
}

/// Single-turn text completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Analyzer built on any completion provider.
pub struct PromptAnalyzer<P> {
    provider: P,
    retry: RetryPolicy,
}

impl<P: CompletionProvider> PromptAnalyzer<P> {
    pub fn new(provider: P, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.retry
            .run("analysis.complete", move || self.provider.complete(prompt))
            .await
    }

    /// One completion turn. A response the provider could not hand back in
    /// usable form counts as unparseable output rather than a failure.
    async fn attempt(&self, prompt: &str) -> Result<ParsedAnalysis> {
        match self.complete(prompt).await {
            Ok(text) => Ok(parse_response(&text)),
            Err(LensError::InvalidResponse(reason)) => {
                warn!(%reason, "analysis provider returned an unusable response");
                Ok(ParsedAnalysis::Degraded(String::new()))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<P: CompletionProvider> IssueAnalyzer for PromptAnalyzer<P> {
    fn prompt_version(&self) -> &str {
        prompt::PROMPT_VERSION
    }

    #[instrument(skip(self, snapshot), fields(issue = %snapshot.issue))]
    async fn analyze(&self, snapshot: &IssueSnapshot) -> Result<AnalysisResult> {
        let rendered = prompt::render(snapshot);

        let parsed = match self.attempt(&rendered).await? {
            ParsedAnalysis::Degraded(_) => {
                warn!("unparseable analysis response, asking again");
                self.attempt(&prompt::strict(&rendered)).await?
            }
            structured => structured,
        };

        Ok(into_result(snapshot, parsed, self.prompt_version()))
    }
}

/// Build a result from a parse outcome. Degraded output still yields a result.
pub fn into_result(
    snapshot: &IssueSnapshot,
    parsed: ParsedAnalysis,
    prompt_version: &str,
) -> AnalysisResult {
    let base = |category: Category, summary: String, confidence: f64| AnalysisResult {
        issue: snapshot.issue.clone(),
        category,
        summary,
        confidence,
        generated_at: Utc::now(),
        prompt_version: prompt_version.to_string(),
        priority: PriorityScore::default(),
        suggested_labels: Vec::new(),
        potential_impact: String::new(),
        degraded: false,
    };

    match parsed {
        ParsedAnalysis::Structured(StructuredAnalysis {
            category,
            summary,
            confidence,
            priority,
            suggested_labels,
            potential_impact,
        }) => AnalysisResult {
            priority,
            suggested_labels,
            potential_impact,
            ..base(category, summary, confidence)
        },
        ParsedAnalysis::Degraded(raw) => {
            warn!(issue = %snapshot.issue, "analysis degraded to category other");
            let raw: String = raw.trim().chars().take(MAX_DEGRADED_SUMMARY_CHARS).collect();
            let summary = if raw.is_empty() {
                format!("Unstructured analysis for \"{}\"", snapshot.title)
            } else {
                raw
            };
            AnalysisResult {
                degraded: true,
                ..base(Category::Other, summary, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueRef, IssueState};
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Mutex;

    /// Replays canned completions in order.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LensError::UpstreamUnavailable("script exhausted".into())))
        }
    }

    fn snapshot() -> IssueSnapshot {
        IssueSnapshot {
            issue: IssueRef::new("acme", "core", 42).unwrap(),
            title: "Crash on start".into(),
            body: "panics".into(),
            labels: BTreeSet::new(),
            state: IssueState::Open,
            content_hash: "h1".into(),
            comments: vec![],
            html_url: String::new(),
            author: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_structured_response() {
        let analyzer = PromptAnalyzer::new(
            Scripted::new(vec![Ok(
                r#"{"category":"bug","summary":"Crash","confidence":1.4}"#.into(),
            )]),
            no_retry(),
        );
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Bug);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.prompt_version, prompt::PROMPT_VERSION);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_reasks_once_then_succeeds() {
        let provider = Scripted::new(vec![
            Ok("Sure! It is a bug.".into()),
            Ok(r#"{"category":"question","summary":"How to configure"}"#.into()),
        ]);
        let analyzer = PromptAnalyzer::new(provider, no_retry());
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Question);

        let prompts = analyzer.provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("ONLY the JSON"));
    }

    #[tokio::test]
    async fn test_second_parse_failure_degrades() {
        let provider = Scripted::new(vec![Ok("nope".into()), Ok("still nope".into())]);
        let analyzer = PromptAnalyzer::new(provider, no_retry());
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Other);
        assert_eq!(result.summary, "still nope");
        assert_eq!(result.confidence, 0.0);
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let provider = Scripted::new(vec![Err(LensError::Unauthorized)]);
        let analyzer = PromptAnalyzer::new(provider, no_retry());
        let err = analyzer.analyze(&snapshot()).await.unwrap_err();
        assert_eq!(err, LensError::Unauthorized);
    }

    #[tokio::test]
    async fn test_unavailable_is_retried_once() {
        let provider = Scripted::new(vec![
            Err(LensError::UpstreamUnavailable("503".into())),
            Ok(r#"{"category":"bug","summary":"Crash"}"#.into()),
        ]);
        let analyzer = PromptAnalyzer::new(provider, no_retry());
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Bug);
    }

    #[tokio::test]
    async fn test_undecodable_provider_response_degrades() {
        let provider = Scripted::new(vec![
            Err(LensError::InvalidResponse("error decoding response body".into())),
            Err(LensError::InvalidResponse("error decoding response body".into())),
        ]);
        let analyzer = PromptAnalyzer::new(provider, RetryPolicy::default());
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Other);
        assert!(result.degraded);
        assert_eq!(result.summary, "Unstructured analysis for \"Crash on start\"");

        let prompts = analyzer.provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("ONLY the JSON"));
    }

    #[tokio::test]
    async fn test_reask_recovers_from_undecodable_response() {
        let provider = Scripted::new(vec![
            Err(LensError::InvalidResponse("Gemini HTTP 400 Bad Request".into())),
            Ok(r#"{"category":"feature_request","summary":"Add export"}"#.into()),
        ]);
        let analyzer = PromptAnalyzer::new(provider, no_retry());
        let result = analyzer.analyze(&snapshot()).await.unwrap();
        assert_eq!(result.category, Category::Feature);
        assert!(!result.degraded);
    }
}
