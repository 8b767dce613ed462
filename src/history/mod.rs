//! Append-only, crash-recoverable record of scene events.
//!
//! Each session is one JSON log file plus a dedicated image archive
//! directory; archived images are independent copies, decoupled from the
//! image cache's eviction. Appends rewrite the whole log through a temp file
//! and rename, so a partially written event is never visible and restart
//! reconstructs history purely from disk.

use crate::cache::is_plain_filename;
use crate::persist::write_json_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Durable record of one successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEvent {
    pub timestamp: DateTime<Utc>,
    pub transcript: String,
    pub scene_text: String,
    /// Path of the archived image copy, relative to the history root.
    pub image_path: String,
}

/// One session's full log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub events: Vec<SceneEvent>,
}

/// Listing entry for a session, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub event_count: usize,
}

pub struct SessionHistory {
    dir: PathBuf,
    images_dir: PathBuf,
    current: Mutex<Option<String>>,
    // Disambiguates archive filenames created within the same second.
    sequence: AtomicU64,
}

impl SessionHistory {
    pub fn open(dir: PathBuf) -> Result<Self> {
        let images_dir = dir.join("images");
        std::fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create history dir {}", images_dir.display()))?;

        Ok(Self {
            dir,
            images_dir,
            current: Mutex::new(None),
            sequence: AtomicU64::new(0),
        })
    }

    /// Start a session if none is active and return the current session id.
    pub async fn ensure_session(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(id) = current.as_ref() {
            return Ok(id.clone());
        }

        let now = Utc::now();
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let session_id = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), &unique[..8]);

        let session_images = self.images_dir.join(&session_id);
        std::fs::create_dir_all(&session_images).with_context(|| {
            format!("Failed to create session image dir {}", session_images.display())
        })?;

        let record = SessionRecord {
            session_id: session_id.clone(),
            start_time: now,
            events: Vec::new(),
        };
        write_json_atomic(&self.session_file(&session_id), &record)?;

        info!("Started new session: {}", session_id);
        *current = Some(session_id.clone());

        Ok(session_id)
    }

    pub async fn current_session_id(&self) -> Result<String> {
        self.ensure_session().await
    }

    /// Archive the image bytes under the current session and append a scene
    /// event to its log. All-or-nothing: if the log rewrite fails the event
    /// is not visible and the archived copy is removed again.
    pub async fn append(
        &self,
        transcript: &str,
        scene_text: &str,
        image_bytes: &[u8],
    ) -> Result<SceneEvent> {
        let session_id = self.ensure_session().await?;

        let now = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let image_filename = format!("image_{}_{:04}.png", now.format("%Y%m%d_%H%M%S"), seq);
        let archive_path = self.images_dir.join(&session_id).join(&image_filename);

        std::fs::write(&archive_path, image_bytes)
            .with_context(|| format!("Failed to archive image {}", archive_path.display()))?;

        let event = SceneEvent {
            timestamp: now,
            transcript: transcript.to_string(),
            scene_text: scene_text.to_string(),
            image_path: format!("images/{}/{}", session_id, image_filename),
        };

        // Read-modify-rewrite the whole log so the append is atomic.
        let result = self.append_to_log(&session_id, event.clone());
        if let Err(e) = result {
            if let Err(cleanup) = std::fs::remove_file(&archive_path) {
                warn!(
                    "Failed to remove orphaned archive image {}: {}",
                    archive_path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        Ok(event)
    }

    fn append_to_log(&self, session_id: &str, event: SceneEvent) -> Result<()> {
        let path = self.session_file(session_id);
        let mut record = read_session_file(&path)?;
        record.events.push(event);
        write_json_atomic(&path, &record)
    }

    /// All sessions on disk, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();

        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read history dir {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("session_") || !name.ends_with(".json") {
                continue;
            }
            match read_session_file(&entry.path()) {
                Ok(record) => sessions.push(SessionSummary {
                    session_id: record.session_id,
                    start_time: record.start_time,
                    event_count: record.events.len(),
                }),
                Err(e) => warn!("Skipping unreadable session file {}: {}", name, e),
            }
        }

        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        if !is_plain_filename(session_id) {
            return Ok(None);
        }
        let path = self.session_file(session_id);
        if !path.exists() {
            return Ok(None);
        }
        read_session_file(&path).map(Some)
    }

    /// Resolve an archived image to its on-disk path.
    pub fn resolve_image(&self, session_id: &str, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(session_id) || !is_plain_filename(filename) {
            return None;
        }
        let path = self.images_dir.join(session_id).join(filename);
        path.exists().then_some(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("session_{}.json", session_id))
    }
}

fn read_session_file(path: &Path) -> Result<SessionRecord> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read session file {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse session file {}", path.display()))
}
