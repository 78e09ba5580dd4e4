//! Metadata caching
//!
//! One JSON file per URL, named by the SHA-256 of the URL. Caching is
//! best-effort: unreadable or expired entries are treated as misses.

use crate::error::Result;
use crate::types::{CacheEntry, VideoMetadata};
use crate::utils::paths::ensure_dir;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const DEFAULT_TTL: u64 = 3600; // 1 hour

/// Generate cache key from a URL
pub fn get_cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// On-disk metadata cache rooted at one directory
#[derive(Debug, Clone)]
pub struct MetadataCache {
    dir: PathBuf,
    ttl: u64,
}

impl MetadataCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", get_cache_key(url)))
    }

    /// Get cached metadata if present and not expired
    pub async fn get(&self, url: &str) -> Option<VideoMetadata> {
        let path = self.entry_path(url);

        let content = fs::read_to_string(&path).await.ok()?;
        let entry: CacheEntry<VideoMetadata> = serde_json::from_str(&content).ok()?;

        // Check if expired
        let now = Utc::now().timestamp();
        if now - entry.timestamp > entry.ttl as i64 {
            let _ = fs::remove_file(&path).await;
            return None;
        }

        debug!(url, "Metadata cache hit");
        Some(entry.data)
    }

    /// Store metadata for a URL
    pub async fn set(&self, url: &str, metadata: &VideoMetadata) -> Result<()> {
        ensure_dir(&self.dir).await?;

        let entry = CacheEntry {
            data: metadata,
            timestamp: Utc::now().timestamp(),
            ttl: self.ttl,
        };

        let content = serde_json::to_string(&entry)?;
        fs::write(self.entry_path(url), content).await?;
        Ok(())
    }

    /// Remove every cached entry
    pub async fn clear(&self) -> Result<()> {
        if fs::try_exists(&self.dir).await? {
            fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}
