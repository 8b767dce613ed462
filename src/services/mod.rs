//! Narrow interfaces to the external collaborators: transcription, the two
//! language-model calls, and image generation. The pipeline only ever talks
//! to these traits, so tests swap in mock implementations and the backing
//! vendor can change without touching the coordinator.

mod openai;

pub use openai::OpenAiClient;

use crate::characters::Character;
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors surfaced by the external services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Service returned an empty result")]
    Empty,
}

/// Result of the environment-analysis call: either "no update needed" or a
/// full replacement description of the physical setting.
#[derive(Debug, Clone)]
pub struct EnvironmentAnalysis {
    pub needs_update: bool,
    pub description: Option<String>,
}

/// Everything the scene-composition call sees. Characters are supplied in
/// randomized order to avoid positional bias in the model.
#[derive(Debug)]
pub struct SceneRequest<'a> {
    pub transcript: &'a str,
    pub environment: &'a str,
    pub style: &'a str,
    pub previous_scene: &'a str,
    pub characters: &'a [Character],
}

#[derive(Debug, Clone)]
pub struct ComposedScene {
    pub scene_text: String,
    /// Names of supplied characters the scene text actually references.
    pub character_names: BTreeSet<String>,
}

/// Generated image, either as raw bytes or as a URL to fetch.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    Bytes(Vec<u8>),
    Url(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait EnvironmentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        transcript: &str,
        current_description: &str,
        previous_scene: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError>;
}

#[async_trait]
pub trait SceneComposer: Send + Sync {
    async fn compose(&self, request: SceneRequest<'_>) -> Result<ComposedScene, ServiceError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, scene_text: &str) -> Result<ImagePayload, ServiceError>;
}

/// Names of the supplied characters that appear verbatim in the scene text.
pub(crate) fn referenced_character_names(
    scene_text: &str,
    characters: &[Character],
) -> BTreeSet<String> {
    let lowered = scene_text.to_lowercase();
    characters
        .iter()
        .filter(|c| !c.name.is_empty() && lowered.contains(&c.name.to_lowercase()))
        .map(|c| c.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str) -> Character {
        Character {
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn finds_referenced_names_case_insensitively() {
        let characters = vec![character("Gandalf"), character("Aragorn")];
        let names =
            referenced_character_names("gandalf raises his staff in the rain", &characters);
        assert!(names.contains("Gandalf"));
        assert!(!names.contains("Aragorn"));
    }

    #[test]
    fn openai_client_serves_every_pipeline_seam() {
        use crate::config::OpenAiConfig;
        use std::sync::Arc;

        let config = OpenAiConfig {
            base_url: "http://localhost".to_string(),
            chat_model: "test".to_string(),
            transcribe_model: "test".to_string(),
            image_model: "test".to_string(),
        };
        let client = Arc::new(OpenAiClient::new("test-key", config).expect("client should build"));

        let _: Arc<dyn Transcriber> = client.clone();
        let _: Arc<dyn EnvironmentAnalyzer> = client.clone();
        let _: Arc<dyn SceneComposer> = client.clone();
        let _: Arc<dyn ImageGenerator> = client;
    }
}
