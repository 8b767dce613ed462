//! Bounded local cache of generated scene images.
//!
//! The cache owns its directory exclusively and keeps only the N most recent
//! images; inserting beyond capacity evicts the oldest entry and deletes its
//! backing file. Session history keeps its own copies, so eviction never
//! invalidates archived references.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A single cached image, identified by its generated filename.
#[derive(Debug, Clone, Serialize)]
pub struct CachedImage {
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

pub struct ImageCache {
    dir: PathBuf,
    capacity: usize,
    entries: Mutex<VecDeque<CachedImage>>,
    // Disambiguates filenames generated within the same millisecond.
    sequence: AtomicU64,
}

impl ImageCache {
    /// Open the cache at `dir`, recovering entries left by a previous run in
    /// filename order (filenames embed the creation timestamp).
    pub fn open(dir: PathBuf, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;

        let mut recovered: Vec<(String, DateTime<Utc>)> = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read cache dir {}", dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("scene_") && name.ends_with(".png") {
                let created_at = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                recovered.push((name, created_at));
            }
        }
        recovered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries: VecDeque<CachedImage> = recovered
            .into_iter()
            .map(|(filename, created_at)| CachedImage {
                filename,
                created_at,
            })
            .collect();

        // The capacity bound holds from the moment the cache opens, even
        // when a previous run left more files behind than we now keep.
        while entries.len() > capacity {
            if let Some(oldest) = entries.pop_front() {
                let old_path = dir.join(&oldest.filename);
                if let Err(e) = std::fs::remove_file(&old_path) {
                    warn!("Failed to remove evicted image {}: {}", old_path.display(), e);
                }
            }
        }

        if !entries.is_empty() {
            info!("Recovered {} cached scene images", entries.len());
        }

        let cache = Self {
            dir,
            capacity,
            entries: Mutex::new(entries),
            sequence: AtomicU64::new(0),
        };

        Ok(cache)
    }

    /// Store image bytes in the cache, evicting the oldest entries beyond
    /// capacity. Eviction happens under the cache lock, so a concurrent
    /// `latest()` never resolves to an already-deleted file.
    pub async fn put(&self, bytes: &[u8]) -> Result<CachedImage> {
        let created_at = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let filename = format!("scene_{}_{:04}.png", created_at.timestamp_millis(), seq);
        let path = self.dir.join(&filename);

        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write cached image {}", path.display()))?;

        let image = CachedImage {
            filename,
            created_at,
        };

        let mut entries = self.entries.lock().await;
        entries.push_back(image.clone());

        while entries.len() > self.capacity {
            if let Some(oldest) = entries.pop_front() {
                let old_path = self.dir.join(&oldest.filename);
                if let Err(e) = std::fs::remove_file(&old_path) {
                    warn!("Failed to remove evicted image {}: {}", old_path.display(), e);
                }
            }
        }

        Ok(image)
    }

    /// The most recently cached image, if any. Used to seed newly connecting
    /// viewers.
    pub async fn latest(&self) -> Option<CachedImage> {
        self.entries.lock().await.back().cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|e| e.filename == filename)
    }

    /// Resolve a cached filename to its on-disk path. Rejects anything that
    /// is not a plain filename to keep requests inside the cache directory.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(filename) {
            return None;
        }
        let path = self.dir.join(filename);
        path.exists().then_some(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub(crate) fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}
