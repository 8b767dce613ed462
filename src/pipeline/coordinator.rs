use super::filter::TextFilter;
use super::{looks_like_language, AudioSubmission, RunOutcome, RunReport, Stage};
use crate::broadcast::Broadcaster;
use crate::cache::ImageCache;
use crate::characters::{Character, CharacterStore};
use crate::config::PipelineConfig;
use crate::context::ContextStore;
use crate::history::SessionHistory;
use crate::services::{
    EnvironmentAnalyzer, ImageGenerator, ImagePayload, SceneComposer, SceneRequest, Transcriber,
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// External collaborators the coordinator drives, behind trait objects so
/// tests can substitute mocks.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn EnvironmentAnalyzer>,
    pub composer: Arc<dyn SceneComposer>,
    pub image_generator: Arc<dyn ImageGenerator>,
}

pub struct Coordinator {
    context: Arc<ContextStore>,
    cache: Arc<ImageCache>,
    history: Arc<SessionHistory>,
    characters: Arc<CharacterStore>,
    broadcaster: Broadcaster,
    services: Services,
    filter: Arc<dyn TextFilter>,
    timeouts: PipelineConfig,
    http: reqwest::Client,
}

#[derive(Default)]
struct RunNotes {
    transcript: Option<String>,
    scene_text: Option<String>,
    environment_skipped_locked: bool,
    environment_error: Option<String>,
    cache_error: Option<String>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: Arc<ContextStore>,
        cache: Arc<ImageCache>,
        history: Arc<SessionHistory>,
        characters: Arc<CharacterStore>,
        broadcaster: Broadcaster,
        services: Services,
        filter: Arc<dyn TextFilter>,
        timeouts: PipelineConfig,
    ) -> Self {
        Self {
            context,
            cache,
            history,
            characters,
            broadcaster,
            services,
            filter,
            timeouts,
            http: reqwest::Client::new(),
        }
    }

    /// Drive one submission through the full stage sequence. Stage failures
    /// are folded into the report; this never panics the worker.
    pub async fn process(&self, submission: AudioSubmission) -> RunReport {
        let mut notes = RunNotes::default();
        let outcome = self.run(submission, &mut notes).await;

        RunReport {
            outcome,
            transcript: notes.transcript,
            scene_text: notes.scene_text,
            environment_skipped_locked: notes.environment_skipped_locked,
            environment_error: notes.environment_error,
            cache_error: notes.cache_error,
        }
    }

    async fn run(&self, submission: AudioSubmission, notes: &mut RunNotes) -> RunOutcome {
        // Transcribing: fatal on failure, nothing downstream is meaningful
        // without a transcript.
        let transcript = match timeout(
            self.timeouts.transcribe_timeout(),
            self.services
                .transcriber
                .transcribe(&submission.bytes, &submission.filename),
        )
        .await
        {
            Err(_) => return failed(Stage::Transcribing, "transcription timed out"),
            Ok(Err(e)) => return failed(Stage::Transcribing, e),
            Ok(Ok(text)) => text,
        };

        if !looks_like_language(&transcript) {
            return failed(
                Stage::Transcribing,
                "transcript failed the language validity check",
            );
        }

        info!("Transcript: {}", transcript);
        notes.transcript = Some(transcript.clone());

        // AnalyzingEnvironment: best-effort, never aborts the run.
        self.analyze_environment(&transcript, notes).await;

        // ComposingScene: fatal on failure or empty output.
        let scene_text = match self.compose_scene(&transcript).await {
            Ok(text) => text,
            Err(reason) => return RunOutcome::Failed {
                stage: Stage::ComposingScene,
                reason,
            },
        };

        info!("Scene description: {}", scene_text);
        notes.scene_text = Some(scene_text.clone());

        // The scene prompt is persisted and broadcast before image generation;
        // if the image stage fails, the prompt stays visible as a partial
        // update (documented policy, no rollback).
        if let Err(e) = self.context.set_last_scene_prompt(&scene_text).await {
            error!("Failed to persist scene prompt: {:#}", e);
        }
        self.broadcaster.publish_scene(&scene_text);

        // GeneratingImage
        let payload = match timeout(
            self.timeouts.image_timeout(),
            self.services.image_generator.generate(&scene_text),
        )
        .await
        {
            Err(_) => return failed(Stage::GeneratingImage, "image generation timed out"),
            Ok(Err(e)) => return failed(Stage::GeneratingImage, e),
            Ok(Ok(payload)) => payload,
        };

        let image_bytes = match self.resolve_image(payload).await {
            Ok(bytes) => bytes,
            Err(reason) => return RunOutcome::Failed {
                stage: Stage::GeneratingImage,
                reason,
            },
        };

        // Caching: non-fatal; archiving copies from the generated bytes and
        // proceeds regardless.
        match self.cache.put(&image_bytes).await {
            Ok(image) => {
                self.broadcaster
                    .publish_image(&format!("/scene_images/{}", image.filename));
            }
            Err(e) => notes.cache_error = Some(format!("{:#}", e)),
        }

        // Archiving: already-emitted notifications stand even if this fails.
        match self
            .history
            .append(&transcript, &scene_text, &image_bytes)
            .await
        {
            Ok(event) => RunOutcome::Completed(event),
            Err(e) => failed(Stage::Archiving, format!("{:#}", e)),
        }
    }

    async fn analyze_environment(&self, transcript: &str, notes: &mut RunNotes) {
        if self.context.is_environment_locked().await {
            info!("Environment is locked, skipping automatic update");
            notes.environment_skipped_locked = true;
            return;
        }

        let current = self.context.environment().await;
        let previous = self.context.last_scene_prompt().await;

        let analysis = match timeout(
            self.timeouts.analyze_timeout(),
            self.services
                .analyzer
                .analyze(transcript, &current.description, &previous.last_text),
        )
        .await
        {
            Err(_) => {
                notes.environment_error = Some("environment analysis timed out".to_string());
                return;
            }
            Ok(Err(e)) => {
                notes.environment_error = Some(e.to_string());
                return;
            }
            Ok(Ok(analysis)) => analysis,
        };

        if !analysis.needs_update {
            debug!("No environment update needed");
            return;
        }

        let Some(description) = analysis.description else {
            return;
        };

        let filtered = self.filter.filter(&description);
        if filtered.trim().is_empty() {
            notes.environment_error =
                Some("environment description was empty after filtering".to_string());
            return;
        }

        // The environment may have been locked between the check above and
        // this write; only log and broadcast when the description landed.
        match self.context.set_environment(&filtered, None).await {
            Ok(update) if update.applied => {
                info!("Updated environment description");
                self.broadcaster
                    .publish_environment(&update.state.description);
            }
            Ok(_) => {
                info!("Environment was locked before the update could be stored");
                notes.environment_skipped_locked = true;
            }
            Err(e) => notes.environment_error = Some(format!("{:#}", e)),
        }
    }

    async fn compose_scene(&self, transcript: &str) -> Result<String, String> {
        let environment = self.context.environment().await;
        let style = self.context.style().await;
        let previous = self.context.last_scene_prompt().await;

        let characters = shuffled(self.characters.list().await.into_values().collect());

        let request = SceneRequest {
            transcript,
            environment: &environment.description,
            style: &style.text,
            previous_scene: &previous.last_text,
            characters: &characters,
        };

        let composed = match timeout(
            self.timeouts.compose_timeout(),
            self.services.composer.compose(request),
        )
        .await
        {
            Err(_) => return Err("scene composition timed out".to_string()),
            Ok(Err(e)) => return Err(e.to_string()),
            Ok(Ok(composed)) => composed,
        };

        if composed.scene_text.trim().is_empty() {
            return Err("no valid scene could be composed".to_string());
        }

        if !composed.character_names.is_empty() {
            debug!(
                "Scene references characters: {:?}",
                composed.character_names
            );
        }

        Ok(composed.scene_text)
    }

    async fn resolve_image(&self, payload: ImagePayload) -> Result<Vec<u8>, String> {
        match payload {
            ImagePayload::Bytes(bytes) if bytes.is_empty() => {
                Err("image generator returned no data".to_string())
            }
            ImagePayload::Bytes(bytes) => Ok(bytes),
            ImagePayload::Url(url) => {
                let response = timeout(self.timeouts.image_timeout(), self.http.get(&url).send())
                    .await
                    .map_err(|_| "image download timed out".to_string())?
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| format!("image download failed: {e}"))?;

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| format!("image download failed: {e}"))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

// Characters are presented in random order so the composition model sees no
// positional bias.
fn shuffled(mut characters: Vec<Character>) -> Vec<Character> {
    characters.shuffle(&mut rand::thread_rng());
    characters
}

fn failed(stage: Stage, reason: impl ToString) -> RunOutcome {
    RunOutcome::Failed {
        stage,
        reason: reason.to_string(),
    }
}
