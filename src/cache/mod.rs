// Cache module.
// TTL-bounded storage of analysis results keyed by fingerprint, with memory and disk backends.

pub mod disk;
pub mod memory;
pub mod paths;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{CacheBackend, CacheConfig};
use crate::error::{LensError, Result};
use crate::model::{AnalysisResult, CacheEntry, Fingerprint, IssueRef};

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Which entries a clear removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Repository { owner: String, name: String },
    Issue(IssueRef),
}

impl ClearScope {
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        let issue = &entry.result.issue;
        match self {
            ClearScope::All => true,
            ClearScope::Repository { owner, name } => issue.in_repository(owner, name),
            ClearScope::Issue(target) => {
                issue.number == target.number && issue.in_repository(&target.owner, &target.name)
            }
        }
    }
}

/// Key-value store for analysis results.
///
/// Expired entries are never returned; `get` removes them as it finds them.
/// Backend failures surface as `CacheUnavailable` and are never swallowed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>>;

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: AnalysisResult,
        ttl: Duration,
    ) -> Result<()>;

    /// Remove entries in `scope`, returning how many were removed.
    async fn clear(&self, scope: &ClearScope) -> Result<usize>;

    /// Remove expired entries, returning how many were removed.
    async fn sweep(&self) -> Result<usize>;

    /// Number of stored entries, including any not yet swept.
    async fn len(&self) -> Result<usize>;

    /// Short backend name for diagnostics.
    fn backend(&self) -> &'static str;
}

/// Build the configured backend.
pub fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    Ok(match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new(config.max_entries)),
        CacheBackend::Disk => {
            let root = match &config.dir {
                Some(dir) => dir.clone(),
                None => paths::cache_dir().ok_or_else(|| {
                    LensError::Config("no platform cache directory; set cache.dir".into())
                })?,
            };
            if config.max_entries.is_some() {
                warn!("cache.max_entries is only enforced by the memory backend");
            }
            Arc::new(DiskStore::open(root)?)
        }
    })
}

/// Run `sweep` on `store` every `interval` until the returned handle is aborted.
pub fn spawn_sweeper(store: Arc<dyn CacheStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired cache entries"),
                Err(err) => warn!(error = %err, "cache sweep failed"),
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::model::{AnalysisResult, Category, IssueRef, PriorityScore};

    pub fn result(owner: &str, name: &str, number: u64) -> AnalysisResult {
        AnalysisResult {
            issue: IssueRef::new(owner, name, number).unwrap(),
            category: Category::Bug,
            summary: format!("{}/{}#{}", owner, name, number),
            confidence: 0.9,
            generated_at: Utc::now(),
            prompt_version: "v1".into(),
            priority: PriorityScore::default(),
            suggested_labels: vec!["bug".into()],
            potential_impact: String::new(),
            degraded: false,
        }
    }
}
