use crate::broadcast::{Broadcaster, Snapshot};
use crate::cache::ImageCache;
use crate::characters::CharacterStore;
use crate::context::ContextStore;
use crate::history::SessionHistory;
use crate::pipeline::PipelineHandle;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ContextStore>,
    pub cache: Arc<ImageCache>,
    pub history: Arc<SessionHistory>,
    pub characters: Arc<CharacterStore>,
    pub broadcaster: Broadcaster,
    pub pipeline: PipelineHandle,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Latest known state, replayed to each newly connecting viewer.
    pub async fn snapshot(&self) -> Snapshot {
        let image_url = self
            .cache
            .latest()
            .await
            .map(|image| format!("/scene_images/{}", image.filename));

        let environment = self.context.environment().await;
        let scene_prompt = self.context.last_scene_prompt().await;

        Snapshot {
            image_url,
            environment: environment.description,
            scene_prompt: scene_prompt.last_text,
        }
    }
}
