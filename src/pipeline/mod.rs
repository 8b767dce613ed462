//! The pipeline coordinator: sequences each submitted audio chunk through
//! transcription, environment analysis, scene composition, image generation,
//! caching and archiving, and pushes externally visible changes to the
//! broadcaster. One run is active at a time; further submissions queue FIFO.

mod coordinator;
pub mod filter;

pub use coordinator::{Coordinator, Services};
pub use filter::{EnvironmentTextFilter, NoopFilter, TextFilter};

use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::history::SceneEvent;

/// Pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Transcribing,
    AnalyzingEnvironment,
    ComposingScene,
    GeneratingImage,
    Caching,
    Archiving,
}

/// Terminal state of one run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(SceneEvent),
    Failed { stage: Stage, reason: String },
}

/// Full account of one run, including the named non-fatal failure branches,
/// so callers and tests can assert on exactly what happened.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub transcript: Option<String>,
    pub scene_text: Option<String>,
    /// The environment stage was skipped because the store is locked.
    pub environment_skipped_locked: bool,
    pub environment_error: Option<String>,
    pub cache_error: Option<String>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed(_))
    }
}

/// One audio artifact handed to the pipeline.
#[derive(Debug)]
pub struct AudioSubmission {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Submission queue is full")]
    QueueFull,

    #[error("Pipeline worker is not running")]
    Closed,
}

/// Handle for submitting audio to the single pipeline worker. Submission is
/// synchronous accept/reject; results arrive via the broadcaster.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<AudioSubmission>,
    max_upload_bytes: usize,
}

impl PipelineHandle {
    pub fn submit(&self, submission: AudioSubmission) -> Result<(), SubmitError> {
        validate_submission(&submission, self.max_upload_bytes)?;

        match self.tx.try_send(submission) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }
}

/// Spawn the worker task that drains the submission queue strictly in order,
/// one run at a time. Returns the submission handle.
pub fn spawn(
    coordinator: Coordinator,
    queue_depth: usize,
    max_upload_bytes: usize,
) -> PipelineHandle {
    let (tx, mut rx) = mpsc::channel::<AudioSubmission>(queue_depth);

    tokio::spawn(async move {
        info!("Pipeline worker started");

        while let Some(submission) = rx.recv().await {
            let report = coordinator.process(submission).await;
            match &report.outcome {
                RunOutcome::Completed(event) => {
                    info!("Run completed, archived image {}", event.image_path);
                }
                RunOutcome::Failed { stage, reason } => {
                    warn!("Run failed at {:?}: {}", stage, reason);
                }
            }
            if let Some(e) = &report.environment_error {
                warn!("Environment analysis did not complete: {}", e);
            }
            if let Some(e) = &report.cache_error {
                warn!("Image caching failed: {}", e);
            }
        }

        info!("Pipeline worker stopped");
    });

    PipelineHandle {
        tx,
        max_upload_bytes,
    }
}

fn validate_submission(
    submission: &AudioSubmission,
    max_upload_bytes: usize,
) -> Result<(), SubmitError> {
    if submission.bytes.is_empty() {
        return Err(SubmitError::Rejected("Empty audio upload".to_string()));
    }

    if submission.bytes.len() > max_upload_bytes {
        return Err(SubmitError::Rejected(format!(
            "Upload of {} bytes exceeds the {} byte limit",
            submission.bytes.len(),
            max_upload_bytes
        )));
    }

    // WAV uploads get a header sanity check before spending a transcription
    // call; other container formats are passed through to the transcriber.
    if submission.filename.to_lowercase().ends_with(".wav")
        && hound::WavReader::new(Cursor::new(&submission.bytes)).is_err()
    {
        return Err(SubmitError::Rejected(
            "Upload is not a valid WAV file".to_string(),
        ));
    }

    Ok(())
}

/// Cheap validity check on a transcript before anything downstream runs:
/// clearly-invalid output (near-empty, or without any common English token)
/// is rejected to avoid wasting model calls.
pub fn looks_like_language(transcript: &str) -> bool {
    let trimmed = transcript.trim();
    if trimmed.len() < 3 {
        return false;
    }

    const COMMON_WORDS: [&str; 10] = ["the", "a", "an", "in", "on", "at", "to", "is", "are", "and"];

    trimmed
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .any(|w| COMMON_WORDS.contains(&w.as_str()))
}
