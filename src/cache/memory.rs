// In-process cache backend.
// HashMap behind an async RwLock with optional capacity bound.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::model::{AnalysisResult, CacheEntry, Fingerprint};

use super::{CacheStore, ClearScope};

/// Bounded in-memory store.
///
/// When `max_entries` is reached, expired entries are dropped first and then
/// the entry closest to expiry.
pub struct MemoryStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    fn make_room(entries: &mut HashMap<Fingerprint, CacheEntry>, capacity: usize) {
        if entries.len() < capacity {
            return;
        }
        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired_at(now));

        while entries.len() >= capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    debug!(fingerprint = %key, "evicting cache entry at capacity");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        {
            let entries = self.entries.read().await;
            match entries.get(fingerprint) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check: a fresh entry may have replaced the expired one in between.
        if entries.get(fingerprint).is_some_and(CacheEntry::is_expired) {
            entries.remove(fingerprint);
            return Ok(None);
        }
        Ok(entries.get(fingerprint).cloned())
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: AnalysisResult,
        ttl: Duration,
    ) -> Result<()> {
        let entry = CacheEntry::new(fingerprint.clone(), result, ttl);
        let mut entries = self.entries.write().await;
        if let Some(capacity) = self.max_entries {
            if !entries.contains_key(fingerprint) {
                Self::make_room(&mut entries, capacity);
            }
        }
        entries.insert(fingerprint.clone(), entry);
        Ok(())
    }

    async fn clear(&self, scope: &ClearScope) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        if *scope == ClearScope::All {
            entries.clear();
        } else {
            entries.retain(|_, e| !scope.matches(e));
        }
        Ok(before - entries.len())
    }

    async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
