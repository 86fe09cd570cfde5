// Analysis orchestration.
// Fetch, fingerprint, cache lookup, deduplicated analysis, and fail-open cache writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::analysis::IssueAnalyzer;
use crate::cache::{CacheStore, ClearScope};
use crate::error::{LensError, Result};
use crate::fingerprint;
use crate::github::{FetcherStatus, IssueFetcher};
use crate::model::{
    AnalysisResult, CacheEntry, Fingerprint, IssueRef, IssueSnapshot, IssueState,
    clamp_confidence,
};
use crate::singleflight::{Role, SingleFlight};

/// Largest number of issues accepted by one batch call.
pub const MAX_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Skip the cache lookup. The fresh result is still written back.
    pub bypass_cache: bool,
}

/// An analysis result with request metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub cached: bool,
    pub elapsed_ms: u64,
    pub html_url: String,
    pub author: Option<String>,
    pub state: IssueState,
    pub labels: Vec<String>,
}

impl Analysis {
    fn new(snapshot: IssueSnapshot, result: AnalysisResult, cached: bool, elapsed: Duration) -> Self {
        Self {
            result,
            cached,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            html_url: snapshot.html_url,
            author: snapshot.author,
            state: snapshot.state,
            labels: snapshot.labels.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_analyses: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    cache_failures: AtomicU64,
    requests: AtomicU64,
    elapsed_ms: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_request(&self, elapsed: Duration, failed: bool) {
        Self::bump(&self.requests);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms.fetch_add(millis, Ordering::Relaxed);
        if failed {
            Self::bump(&self.errors);
        }
    }
}

/// Point-in-time service statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Upstream analyses actually performed.
    pub total_analyses: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percentage of lookups served from cache.
    pub cache_hit_rate: f64,
    pub errors: u64,
    /// Cache operations that failed and were bypassed.
    pub cache_failures: u64,
    pub avg_response_time_ms: f64,
    pub in_flight: usize,
    /// Stored entries, or `None` when the backend could not be reached.
    pub cache_entries: Option<usize>,
    pub cache_backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<FetcherStatus>,
}

/// The part of the miss path that runs detached from the caller.
#[derive(Clone)]
struct Pipeline {
    analyzer: Arc<dyn IssueAnalyzer>,
    cache: Arc<dyn CacheStore>,
    counters: Arc<Counters>,
    ttl: Duration,
}

impl Pipeline {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.cache.get(fingerprint).await {
            Ok(entry) => entry,
            Err(err) => {
                Counters::bump(&self.counters.cache_failures);
                warn!(%fingerprint, error = %err, "cache lookup failed, continuing without cache");
                None
            }
        }
    }

    async fn run(
        self,
        fingerprint: Fingerprint,
        snapshot: IssueSnapshot,
        recheck: bool,
    ) -> Result<AnalysisResult> {
        // A flight for this key may have finished between our lookup and this one starting.
        if recheck {
            if let Some(entry) = self.lookup(&fingerprint).await {
                debug!(%fingerprint, "filled by a previous flight");
                return Ok(entry.result);
            }
        }

        let raw = self.analyzer.analyze(&snapshot).await?;
        let result = validate(raw, &snapshot.issue, self.analyzer.prompt_version());
        Counters::bump(&self.counters.total_analyses);

        if let Err(err) = self.cache.put(&fingerprint, result.clone(), self.ttl).await {
            Counters::bump(&self.counters.cache_failures);
            warn!(%fingerprint, error = %err, "cache write failed, result not stored");
        }
        Ok(result)
    }
}

/// Normalize an analyzer result before it is stored or returned.
fn validate(mut result: AnalysisResult, issue: &IssueRef, prompt_version: &str) -> AnalysisResult {
    result.issue = issue.clone();
    result.confidence = clamp_confidence(result.confidence);
    result.prompt_version = prompt_version.to_string();
    result.summary = result.summary.trim().to_string();
    result
}

/// Flights are keyed by fingerprint and by whether they may answer from cache,
/// so a bypassing caller never receives a result the flight read back from the store.
type FlightKey = (Fingerprint, bool);

/// Coordinates fetching, caching and analysis of issues.
pub struct Orchestrator {
    fetcher: Arc<dyn IssueFetcher>,
    pipeline: Pipeline,
    flights: SingleFlight<FlightKey, AnalysisResult>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn IssueFetcher>,
        analyzer: Arc<dyn IssueAnalyzer>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            pipeline: Pipeline {
                analyzer,
                cache,
                counters: Arc::new(Counters::default()),
                ttl,
            },
            flights: SingleFlight::new(),
        }
    }

    /// Current analysis for `issue`, from cache when the issue content is unchanged.
    #[cfg(test)]
    pub async fn get_analysis(&self, issue: &IssueRef) -> Result<AnalysisResult> {
        self.analyze(issue, AnalyzeOptions::default())
            .await
            .map(|analysis| analysis.result)
    }

    /// Current analysis for `issue` with response metadata. Served from cache when the
    /// issue content is unchanged, unless `options` bypass it.
    #[instrument(skip(self, issue), fields(issue = %issue, bypass = options.bypass_cache))]
    pub async fn analyze(&self, issue: &IssueRef, options: AnalyzeOptions) -> Result<Analysis> {
        let started = Instant::now();
        let outcome = self.resolve(issue, options).await;
        let elapsed = started.elapsed();
        self.pipeline
            .counters
            .record_request(elapsed, outcome.is_err());

        match outcome {
            Ok((snapshot, result, cached)) => {
                info!(
                    cached,
                    category = result.category.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "analysis served"
                );
                Ok(Analysis::new(snapshot, result, cached, elapsed))
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "analysis failed");
                Err(err)
            }
        }
    }

    async fn resolve(
        &self,
        issue: &IssueRef,
        options: AnalyzeOptions,
    ) -> Result<(IssueSnapshot, AnalysisResult, bool)> {
        // Always fetch: the content hash must reflect the live issue.
        let snapshot = self.fetcher.fetch(issue).await?;
        let fingerprint = fingerprint::build(
            &snapshot.issue,
            &snapshot.content_hash,
            self.pipeline.analyzer.prompt_version(),
        )?;

        let counters = &self.pipeline.counters;
        if !options.bypass_cache {
            if let Some(entry) = self.pipeline.lookup(&fingerprint).await {
                Counters::bump(&counters.cache_hits);
                debug!(%fingerprint, "cache hit");
                return Ok((snapshot, entry.result, true));
            }
            Counters::bump(&counters.cache_misses);
            debug!(%fingerprint, "cache miss");
        }

        let pipeline = self.pipeline.clone();
        let key = fingerprint.clone();
        let work_snapshot = snapshot.clone();
        let recheck = !options.bypass_cache;
        let (result, role) = self
            .flights
            .run((fingerprint, recheck), move || {
                pipeline.run(key, work_snapshot, recheck)
            })
            .await;
        if role == Role::Follower {
            debug!("joined in-flight analysis");
        }

        Ok((snapshot, result?, false))
    }

    /// Analyze up to [`MAX_BATCH`] issues concurrently. Results keep input order.
    pub async fn analyze_batch(
        self: &Arc<Self>,
        requests: Vec<(IssueRef, AnalyzeOptions)>,
    ) -> Result<Vec<Result<Analysis>>> {
        if requests.len() > MAX_BATCH {
            return Err(LensError::InvalidInput(format!(
                "at most {} issues per batch, got {}",
                MAX_BATCH,
                requests.len()
            )));
        }

        let handles: Vec<_> = requests
            .into_iter()
            .map(|(issue, options)| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.analyze(&issue, options).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                Err(LensError::UpstreamUnavailable(format!(
                    "batch item failed: {}",
                    e
                )))
            }));
        }
        Ok(results)
    }

    /// Remove cached analyses in `scope`. Store failures are reported, not bypassed.
    pub async fn clear_cache(&self, scope: &ClearScope) -> Result<usize> {
        let removed = self.pipeline.cache.clear(scope).await?;
        info!(?scope, removed, "cache cleared");
        Ok(removed)
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let c = &self.pipeline.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let hits = load(&c.cache_hits);
        let misses = load(&c.cache_misses);
        let lookups = hits + misses;
        let requests = load(&c.requests);

        let cache_entries = match self.pipeline.cache.len().await {
            Ok(len) => Some(len),
            Err(err) => {
                warn!(error = %err, "cache size unavailable");
                None
            }
        };

        StatsSnapshot {
            total_analyses: load(&c.total_analyses),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
            errors: load(&c.errors),
            cache_failures: load(&c.cache_failures),
            avg_response_time_ms: if requests == 0 {
                0.0
            } else {
                load(&c.elapsed_ms) as f64 / requests as f64
            },
            in_flight: self.flights.len(),
            cache_entries,
            cache_backend: self.pipeline.cache.backend(),
            github: self.fetcher.status(),
        }
    }

    /// Wait for in-flight analyses to finish and land in the cache.
    pub async fn shutdown(&self) {
        if !self.flights.is_empty() {
            info!(pending = self.flights.len(), "waiting for in-flight analyses");
        }
        self.flights.drain().await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::github::types::RateLimit;
    use crate::model::{Category, PriorityScore};

    pub struct FakeFetcher {
        bodies: Mutex<HashMap<u64, String>>,
        calls: AtomicU32,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self {
                bodies: Mutex::new(HashMap::new()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn set_body(&self, number: u64, body: &str) {
            self.bodies.lock().unwrap().insert(number, body.to_string());
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IssueFetcher for FakeFetcher {
        async fn fetch(&self, issue: &IssueRef) -> Result<IssueSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if issue.number == 404 {
                return Err(LensError::NotFound(issue.to_string()));
            }
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(&issue.number)
                .cloned()
                .unwrap_or_else(|| "Crash on startup".to_string());
            let title = format!("Issue {}", issue.number);
            let labels: BTreeSet<String> = ["bug".to_string()].into();
            Ok(IssueSnapshot {
                issue: issue.clone(),
                content_hash: fingerprint::content_hash(&title, &body, &labels),
                title,
                body,
                labels,
                state: IssueState::Open,
                comments: Vec::new(),
                html_url: issue.html_url(),
                author: Some("octocat".into()),
                created_at: None,
                updated_at: None,
            })
        }

        fn status(&self) -> Option<FetcherStatus> {
            Some(FetcherStatus {
                authenticated: false,
                rate_limit: RateLimit {
                    limit: 60,
                    remaining: 59,
                    reset: 1_700_000_000,
                },
            })
        }
    }

    pub struct FakeAnalyzer {
        calls: AtomicU32,
        delay: Duration,
        pub confidence: Mutex<f64>,
        pub failure: Mutex<Option<LensError>>,
    }

    impl FakeAnalyzer {
        pub fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
                confidence: Mutex::new(0.8),
                failure: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IssueAnalyzer for FakeAnalyzer {
        fn prompt_version(&self) -> &str {
            "test-v1"
        }

        async fn analyze(&self, snapshot: &IssueSnapshot) -> Result<AnalysisResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(err) = self.failure.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(AnalysisResult {
                issue: snapshot.issue.clone(),
                category: Category::Bug,
                summary: format!("  {}  ", snapshot.title),
                confidence: *self.confidence.lock().unwrap(),
                generated_at: Utc::now(),
                prompt_version: String::new(),
                priority: PriorityScore::default(),
                suggested_labels: vec!["bug".into()],
                potential_impact: String::new(),
                degraded: false,
            })
        }
    }
}
