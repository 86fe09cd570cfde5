// Filesystem cache backend.
// One JSON file per fingerprint, written atomically; IO failures become CacheUnavailable.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::{LensError, Result};
use crate::model::{AnalysisResult, CacheEntry, Fingerprint};

use super::paths::{entries_dir, entry_path};
use super::{CacheStore, ClearScope};

/// Disk-backed store rooted at a cache directory.
pub struct DiskStore {
    root: Arc<PathBuf>,
}

impl DiskStore {
    /// Open (and create if needed) a store under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(entries_dir(&root))?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Run blocking filesystem work off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(|e| LensError::CacheUnavailable(format!("cache task failed: {}", e)))?
    }
}

/// Read an entry file. Missing files are `None`; unreadable JSON is removed and reported as `None`.
fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&contents) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
            delete(path)?;
            Ok(None)
        }
    }
}

/// Write an entry as JSON via a temp file and rename, so readers never see a partial file.
fn write_entry(path: &Path, entry: &CacheEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(entry)
        .map_err(|e| LensError::CacheUnavailable(format!("failed to encode entry: {}", e)))?;

    let temp_path = path.with_extension(format!("{:08x}.tmp", rand::random::<u32>()));
    if let Err(e) = write_and_rename(&temp_path, path, &json) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp_path, path)
}

fn delete(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// All entry files currently on disk.
fn entry_files(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = entries_dir(root);
    let read_dir = match fs::read_dir(&dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for item in read_dir {
        let path = item?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Delete every entry for which `remove` returns true.
fn remove_where(root: &Path, remove: impl Fn(&CacheEntry) -> bool) -> Result<usize> {
    let mut removed = 0;
    for path in entry_files(root)? {
        if let Some(entry) = read_entry(&path)? {
            if remove(&entry) {
                delete(&path)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        let fingerprint = fingerprint.clone();
        self.blocking(move |root| {
            let path = entry_path(root, &fingerprint);
            match read_entry(&path)? {
                Some(entry) if entry.is_expired() => {
                    delete(&path)?;
                    Ok(None)
                }
                other => Ok(other),
            }
        })
        .await
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: AnalysisResult,
        ttl: Duration,
    ) -> Result<()> {
        let entry = CacheEntry::new(fingerprint.clone(), result, ttl);
        self.blocking(move |root| write_entry(&entry_path(root, &entry.fingerprint), &entry))
            .await
    }

    async fn clear(&self, scope: &ClearScope) -> Result<usize> {
        let scope = scope.clone();
        self.blocking(move |root| match scope {
            ClearScope::All => {
                let files = entry_files(root)?;
                for path in &files {
                    delete(path)?;
                }
                Ok(files.len())
            }
            scope => remove_where(root, |entry| scope.matches(entry)),
        })
        .await
    }

    async fn sweep(&self) -> Result<usize> {
        self.blocking(|root| {
            let now = Utc::now();
            remove_where(root, |entry| entry.is_expired_at(now))
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        self.blocking(|root| Ok(entry_files(root)?.len())).await
    }

    fn backend(&self) -> &'static str {
        "disk"
    }
}
