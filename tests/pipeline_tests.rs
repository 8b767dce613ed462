// End-to-end coordinator tests with mocked external services: stage
// fatality rules, lock semantics, ordering, and cache/history interplay.

use adventure_art::config::PipelineConfig;
use adventure_art::pipeline::{self, AudioSubmission, Coordinator, EnvironmentTextFilter, Services};
use adventure_art::services::{
    ComposedScene, EnvironmentAnalysis, EnvironmentAnalyzer, ImageGenerator, ImagePayload,
    SceneComposer, SceneRequest, ServiceError, Transcriber,
};
use adventure_art::{
    Broadcaster, CharacterStore, ContextStore, ImageCache, RunOutcome, SessionHistory, Stage,
    SubmitError, Update,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ============================================================================
// Mock services
// ============================================================================

struct FixedTranscriber(&'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, ServiceError> {
        Ok(self.0.to_string())
    }
}

struct QueueTranscriber(Mutex<VecDeque<String>>);

impl QueueTranscriber {
    fn new(transcripts: &[&str]) -> Self {
        Self(Mutex::new(
            transcripts.iter().map(|t| t.to_string()).collect(),
        ))
    }
}

#[async_trait]
impl Transcriber for QueueTranscriber {
    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, ServiceError> {
        self.0
            .lock()
            .expect("transcript queue lock")
            .pop_front()
            .ok_or(ServiceError::Empty)
    }
}

/// Signals on `started` once the worker has picked up a submission, then
/// holds the run until the test grants a `release` permit.
struct GatedTranscriber {
    started: Arc<Semaphore>,
    release: Arc<Semaphore>,
    transcripts: Mutex<VecDeque<String>>,
}

#[async_trait]
impl Transcriber for GatedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, ServiceError> {
        self.started.add_permits(1);
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|_| ServiceError::Empty)?;
        permit.forget();

        self.transcripts
            .lock()
            .expect("transcript queue lock")
            .pop_front()
            .ok_or(ServiceError::Empty)
    }
}

struct FailingTranscriber;

#[async_trait]
impl Transcriber for FailingTranscriber {
    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Network("transcription backend offline".into()))
    }
}

struct NoUpdateAnalyzer;

#[async_trait]
impl EnvironmentAnalyzer for NoUpdateAnalyzer {
    async fn analyze(
        &self,
        _transcript: &str,
        _current: &str,
        _previous: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError> {
        Ok(EnvironmentAnalysis {
            needs_update: false,
            description: None,
        })
    }
}

struct FixedAnalyzer(&'static str);

#[async_trait]
impl EnvironmentAnalyzer for FixedAnalyzer {
    async fn analyze(
        &self,
        _transcript: &str,
        _current: &str,
        _previous: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError> {
        Ok(EnvironmentAnalysis {
            needs_update: true,
            description: Some(self.0.to_string()),
        })
    }
}

/// Locks the environment while its analysis call is in flight, mimicking an
/// operator flipping the lock after the coordinator's pre-check has passed.
struct LockTakingAnalyzer {
    context: Arc<ContextStore>,
    description: &'static str,
}

#[async_trait]
impl EnvironmentAnalyzer for LockTakingAnalyzer {
    async fn analyze(
        &self,
        _transcript: &str,
        _current: &str,
        _previous: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError> {
        self.context
            .set_environment("", Some(true))
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(EnvironmentAnalysis {
            needs_update: true,
            description: Some(self.description.to_string()),
        })
    }
}

struct FailingAnalyzer;

#[async_trait]
impl EnvironmentAnalyzer for FailingAnalyzer {
    async fn analyze(
        &self,
        _transcript: &str,
        _current: &str,
        _previous: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError> {
        Err(ServiceError::Api {
            status: 500,
            message: "analysis backend error".into(),
        })
    }
}

/// Composes a deterministic scene from the transcript.
struct EchoComposer;

#[async_trait]
impl SceneComposer for EchoComposer {
    async fn compose(&self, request: SceneRequest<'_>) -> Result<ComposedScene, ServiceError> {
        Ok(ComposedScene {
            scene_text: format!("Illustration of: {}", request.transcript),
            character_names: BTreeSet::new(),
        })
    }
}

struct EmptyComposer;

#[async_trait]
impl SceneComposer for EmptyComposer {
    async fn compose(&self, _request: SceneRequest<'_>) -> Result<ComposedScene, ServiceError> {
        Ok(ComposedScene {
            scene_text: String::new(),
            character_names: BTreeSet::new(),
        })
    }
}

struct BytesGenerator;

#[async_trait]
impl ImageGenerator for BytesGenerator {
    async fn generate(&self, _scene_text: &str) -> Result<ImagePayload, ServiceError> {
        Ok(ImagePayload::Bytes(vec![0x89, b'P', b'N', b'G']))
    }
}

struct FailingGenerator;

#[async_trait]
impl ImageGenerator for FailingGenerator {
    async fn generate(&self, _scene_text: &str) -> Result<ImagePayload, ServiceError> {
        Err(ServiceError::Api {
            status: 500,
            message: "image backend error".into(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    coordinator: Coordinator,
    context: Arc<ContextStore>,
    cache: Arc<ImageCache>,
    history: Arc<SessionHistory>,
    broadcaster: Broadcaster,
    _tmp: TempDir,
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        cache_capacity: 10,
        max_upload_bytes: 16 * 1024 * 1024,
        queue_depth: 8,
        transcribe_timeout_secs: 5,
        analyze_timeout_secs: 5,
        compose_timeout_secs: 5,
        image_timeout_secs: 5,
    }
}

fn harness_with_capacity(services: Services, cache_capacity: usize) -> Result<Harness> {
    let tmp = TempDir::new()?;

    let context = Arc::new(ContextStore::open(&tmp.path().join("data"))?);
    let cache = Arc::new(ImageCache::open(
        tmp.path().join("data/scene_cache"),
        cache_capacity,
    )?);
    let history = Arc::new(SessionHistory::open(tmp.path().join("history"))?);
    let characters = Arc::new(CharacterStore::open(tmp.path().join("characters.json"))?);
    let broadcaster = Broadcaster::default();

    let coordinator = Coordinator::new(
        context.clone(),
        cache.clone(),
        history.clone(),
        characters,
        broadcaster.clone(),
        services,
        Arc::new(EnvironmentTextFilter::default()),
        test_config(),
    );

    Ok(Harness {
        coordinator,
        context,
        cache,
        history,
        broadcaster,
        _tmp: tmp,
    })
}

fn harness(services: Services) -> Result<Harness> {
    harness_with_capacity(services, 10)
}

fn services(
    transcriber: impl Transcriber + 'static,
    analyzer: impl EnvironmentAnalyzer + 'static,
    composer: impl SceneComposer + 'static,
    image_generator: impl ImageGenerator + 'static,
) -> Services {
    Services {
        transcriber: Arc::new(transcriber),
        analyzer: Arc::new(analyzer),
        composer: Arc::new(composer),
        image_generator: Arc::new(image_generator),
    }
}

fn submission() -> AudioSubmission {
    AudioSubmission {
        bytes: vec![1u8; 32],
        filename: "chunk.webm".to_string(),
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Update>) -> Vec<Update> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn successful_run_updates_environment_and_records_event() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party enters a dark cave."),
        FixedAnalyzer("A dark cave with glistening walls."),
        EchoComposer,
        BytesGenerator,
    ))?;

    // Starting environment, matching the scenario in the design docs.
    h.context.set_environment("A sunny meadow.", None).await?;

    let mut rx = h.broadcaster.subscribe();
    let report = h.coordinator.process(submission()).await;
    assert!(report.completed());

    // Environment replaced by the analysis result.
    assert_eq!(
        h.context.environment().await.description,
        "A dark cave with glistening walls."
    );

    // A scene event was appended carrying the submitted transcript.
    let session_id = h.history.current_session_id().await?;
    let record = h.history.get_session(&session_id).await?.unwrap();
    assert_eq!(record.events.len(), 1);
    assert_eq!(record.events[0].transcript, "The party enters a dark cave.");
    assert_eq!(
        record.events[0].scene_text,
        "Illustration of: The party enters a dark cave."
    );

    // Viewers saw environment, scene prompt, then image, in stage order.
    let updates = drain(&mut rx);
    assert!(matches!(&updates[0], Update::Environment { description }
        if description == "A dark cave with glistening walls."));
    assert!(matches!(&updates[1], Update::ScenePrompt { prompt }
        if prompt.starts_with("Illustration of:")));
    assert!(matches!(&updates[2], Update::NewImage { image_url }
        if image_url.starts_with("/scene_images/scene_")));

    Ok(())
}

#[tokio::test]
async fn locked_environment_is_skipped_and_unchanged() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party enters a dark cave."),
        FixedAnalyzer("A dark cave with glistening walls."),
        EchoComposer,
        BytesGenerator,
    ))?;

    h.context.set_environment("A sunny meadow.", Some(true)).await?;

    let report = h.coordinator.process(submission()).await;
    assert!(report.completed());
    assert!(report.environment_skipped_locked);
    assert_eq!(h.context.environment().await.description, "A sunny meadow.");

    Ok(())
}

#[tokio::test]
async fn analysis_failure_is_non_fatal() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party walks on in the rain."),
        FailingAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;

    let report = h.coordinator.process(submission()).await;

    assert!(report.completed());
    assert!(report.environment_error.is_some());

    // The run still produced an event using the stored description.
    let session_id = h.history.current_session_id().await?;
    let record = h.history.get_session(&session_id).await?.unwrap();
    assert_eq!(record.events.len(), 1);

    Ok(())
}

#[tokio::test]
async fn near_empty_transcript_is_rejected_with_nothing_emitted() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("  "),
        NoUpdateAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;

    let mut rx = h.broadcaster.subscribe();
    let report = h.coordinator.process(submission()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::Transcribing,
            ..
        }
    ));
    assert!(drain(&mut rx).is_empty());
    assert!(h.history.list_sessions().await?.is_empty());
    assert!(h.cache.is_empty().await);

    Ok(())
}

#[tokio::test]
async fn transcription_failure_is_fatal() -> Result<()> {
    let h = harness(services(
        FailingTranscriber,
        NoUpdateAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;

    let mut rx = h.broadcaster.subscribe();
    let report = h.coordinator.process(submission()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::Transcribing,
            ..
        }
    ));
    assert!(drain(&mut rx).is_empty());

    Ok(())
}

#[tokio::test]
async fn empty_scene_fails_the_composing_stage() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party waits in the dark."),
        NoUpdateAnalyzer,
        EmptyComposer,
        BytesGenerator,
    ))?;

    let mut rx = h.broadcaster.subscribe();
    let report = h.coordinator.process(submission()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::ComposingScene,
            ..
        }
    ));

    // Nothing reached viewers, nothing was archived, continuity untouched.
    assert!(drain(&mut rx).is_empty());
    assert!(h.history.list_sessions().await?.is_empty());
    assert!(h.context.last_scene_prompt().await.last_text.is_empty());

    Ok(())
}

#[tokio::test]
async fn image_failure_leaves_scene_prompt_visible_but_archives_nothing() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party crosses a narrow bridge."),
        NoUpdateAnalyzer,
        EchoComposer,
        FailingGenerator,
    ))?;

    let mut rx = h.broadcaster.subscribe();
    let report = h.coordinator.process(submission()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::GeneratingImage,
            ..
        }
    ));

    // The scene prompt was emitted before image generation and stays visible.
    let updates = drain(&mut rx);
    assert!(updates
        .iter()
        .any(|u| matches!(u, Update::ScenePrompt { .. })));
    assert!(!updates.iter().any(|u| matches!(u, Update::NewImage { .. })));
    assert!(!h.context.last_scene_prompt().await.last_text.is_empty());

    // But no image was cached and no event archived.
    assert!(h.cache.is_empty().await);
    assert!(h.history.list_sessions().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn events_follow_submission_order() -> Result<()> {
    let h = harness(services(
        QueueTranscriber::new(&[
            "The scouts find a trail.",
            "The trail leads to a river.",
            "The river hides a cavern.",
        ]),
        NoUpdateAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;

    for _ in 0..3 {
        let report = h.coordinator.process(submission()).await;
        assert!(report.completed());
    }

    let session_id = h.history.current_session_id().await?;
    let record = h.history.get_session(&session_id).await?.unwrap();
    let transcripts: Vec<&str> = record.events.iter().map(|e| e.transcript.as_str()).collect();
    assert_eq!(
        transcripts,
        [
            "The scouts find a trail.",
            "The trail leads to a river.",
            "The river hides a cavern.",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn lock_taken_during_analysis_suppresses_environment_broadcast() -> Result<()> {
    let tmp = TempDir::new()?;
    let context = Arc::new(ContextStore::open(&tmp.path().join("data"))?);
    let cache = Arc::new(ImageCache::open(tmp.path().join("data/scene_cache"), 10)?);
    let history = Arc::new(SessionHistory::open(tmp.path().join("history"))?);
    let characters = Arc::new(CharacterStore::open(tmp.path().join("characters.json"))?);
    let broadcaster = Broadcaster::default();

    let services = Services {
        transcriber: Arc::new(FixedTranscriber("The party enters a dark cave.")),
        analyzer: Arc::new(LockTakingAnalyzer {
            context: context.clone(),
            description: "A dark cave with glistening walls.",
        }),
        composer: Arc::new(EchoComposer),
        image_generator: Arc::new(BytesGenerator),
    };

    let coordinator = Coordinator::new(
        context.clone(),
        cache,
        history,
        characters,
        broadcaster.clone(),
        services,
        Arc::new(EnvironmentTextFilter::default()),
        test_config(),
    );

    let mut rx = broadcaster.subscribe();
    let report = coordinator.process(submission()).await;

    // The run itself still completes; the environment stage is recorded as
    // skipped rather than applied.
    assert!(report.completed());
    assert!(report.environment_skipped_locked);

    let env = context.environment().await;
    assert!(env.locked);
    assert_ne!(env.description, "A dark cave with glistening walls.");

    // No stale environment update reached viewers.
    assert!(!drain(&mut rx)
        .iter()
        .any(|u| matches!(u, Update::Environment { .. })));

    Ok(())
}

#[tokio::test]
async fn worker_drains_the_queue_in_order_and_rejects_overflow() -> Result<()> {
    let started = Arc::new(Semaphore::new(0));
    let release = Arc::new(Semaphore::new(0));

    let h = harness(services(
        GatedTranscriber {
            started: started.clone(),
            release: release.clone(),
            transcripts: Mutex::new(
                [
                    "The scouts find a trail.",
                    "The trail leads to a river.",
                    "The river hides a cavern.",
                ]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            ),
        },
        NoUpdateAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;
    let Harness {
        coordinator,
        history,
        _tmp,
        ..
    } = h;

    let handle = pipeline::spawn(coordinator, 2, 1024);

    // The worker picks up the first submission and parks at the gate.
    handle.submit(submission())?;
    started.acquire().await?.forget();

    // With the worker busy, two more fill the queue; the next is turned away.
    handle.submit(submission())?;
    handle.submit(submission())?;
    assert!(matches!(
        handle.submit(submission()),
        Err(SubmitError::QueueFull)
    ));

    // Release all three runs and wait for them to land in history.
    release.add_permits(3);

    let mut events = Vec::new();
    for _ in 0..200 {
        let session_id = history.current_session_id().await?;
        if let Some(record) = history.get_session(&session_id).await? {
            if record.events.len() == 3 {
                events = record.events;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let transcripts: Vec<&str> = events.iter().map(|e| e.transcript.as_str()).collect();
    assert_eq!(
        transcripts,
        [
            "The scouts find a trail.",
            "The trail leads to a river.",
            "The river hides a cavern.",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn cache_is_bounded_while_history_keeps_everything() -> Result<()> {
    let h = harness_with_capacity(
        services(
            FixedTranscriber("The battle rages on in the courtyard."),
            NoUpdateAnalyzer,
            EchoComposer,
            BytesGenerator,
        ),
        10,
    )?;

    for _ in 0..12 {
        let report = h.coordinator.process(submission()).await;
        assert!(report.completed());
    }

    // Exactly the 10 most recent images are cached...
    assert_eq!(h.cache.len().await, 10);

    // ...while all 12 runs remain retrievable through session history.
    let session_id = h.history.current_session_id().await?;
    let record = h.history.get_session(&session_id).await?.unwrap();
    assert_eq!(record.events.len(), 12);

    for event in &record.events {
        let filename = event.image_path.rsplit('/').next().unwrap();
        assert!(h.history.resolve_image(&session_id, filename).is_some());
    }

    Ok(())
}

#[tokio::test]
async fn clearing_prompt_and_resetting_style_leave_history_untouched() -> Result<()> {
    let h = harness(services(
        FixedTranscriber("The party rests at the campfire."),
        NoUpdateAnalyzer,
        EchoComposer,
        BytesGenerator,
    ))?;

    let report = h.coordinator.process(submission()).await;
    assert!(report.completed());

    let session_id = h.history.current_session_id().await?;
    let before = h.history.get_session(&session_id).await?.unwrap();

    h.context.clear_last_scene_prompt().await?;
    h.context.reset_style().await?;

    let after = h.history.get_session(&session_id).await?.unwrap();
    assert_eq!(after.events.len(), before.events.len());
    assert_eq!(after.events[0].scene_text, before.events[0].scene_text);
    assert_eq!(after.events[0].transcript, before.events[0].transcript);

    Ok(())
}
