//! OpenAI-backed implementations of the external-service traits: Whisper
//! transcription, chat completions for environment analysis and scene
//! composition, and the images API for generation.

use super::{
    referenced_character_names, ComposedScene, EnvironmentAnalysis, EnvironmentAnalyzer,
    ImageGenerator, ImagePayload, SceneComposer, SceneRequest, ServiceError, Transcriber,
};
use crate::config::OpenAiConfig;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Sentinel the analysis model returns when the setting has not changed.
const NO_UPDATE_SENTINEL: &str = "NO_UPDATE_NEEDED";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, config: OpenAiConfig) -> Result<Self, ServiceError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ServiceError::NoApiKey);
        }

        // Overall request deadlines are imposed per stage by the coordinator;
        // the client only bounds connection establishment.
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    /// Client configured from the `OPENAI_API_KEY` environment variable.
    pub fn from_env(config: OpenAiConfig) -> Result<Self, ServiceError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ServiceError::NoApiKey)?;
        Self::new(api_key, config)
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: self.config.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            max_tokens: 500,
            temperature: 0.5,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ServiceError::Empty);
        }

        Ok(content)
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, ServiceError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcribe_model.clone());

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        Ok(parsed.text)
    }
}

#[async_trait]
impl EnvironmentAnalyzer for OpenAiClient {
    async fn analyze(
        &self,
        transcript: &str,
        current_description: &str,
        previous_scene: &str,
    ) -> Result<EnvironmentAnalysis, ServiceError> {
        let system = "You analyze tabletop session transcripts to maintain an accurate \
            environment description. You only update the description when there's clear \
            evidence of a significant location or setting change.";

        let user = format!(
            "You maintain a concise description of the current environment for a tabletop \
             game. Analyze the new transcript snippet and decide whether the setting has \
             changed significantly.\n\n\
             Guidelines:\n\
             - Keep the description brief (under 100 words) but informative\n\
             - Focus on physical setting elements that would appear in an image \
             (location, atmosphere, time of day, weather)\n\
             - Only update when there is clear evidence the setting changed\n\
             - Be conservative; don't change the environment for minor details\n\
             - Never mention characters or their actions\n\n\
             Current Environment Description:\n{current_description}\n\n\
             Previous Scene:\n{previous_scene}\n\n\
             New Transcript Snippet:\n{transcript}\n\n\
             Does this transcript indicate a significant change to the environment? If yes, \
             provide a new complete environment description. If no, respond with \
             '{NO_UPDATE_SENTINEL}'."
        );

        let content = self.chat(system, &user).await?;

        if content.contains(NO_UPDATE_SENTINEL) {
            return Ok(EnvironmentAnalysis {
                needs_update: false,
                description: None,
            });
        }

        Ok(EnvironmentAnalysis {
            needs_update: true,
            description: Some(content),
        })
    }
}

#[async_trait]
impl SceneComposer for OpenAiClient {
    async fn compose(&self, request: SceneRequest<'_>) -> Result<ComposedScene, ServiceError> {
        let system = "You are a concise scene descriptor for a tabletop session, focused on \
            clear, imageable moments. Only include characters that are actually mentioned or \
            implied in the transcript, maintaining consistency with their descriptions.";

        let character_details = if request.characters.is_empty() {
            "No character data available.".to_string()
        } else {
            request
                .characters
                .iter()
                .map(|c| format!("{}: {}", c.name, c.description))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let user = format!(
            "Identify the most visually interesting key event from the transcript and \
             describe it in a clear, concise way optimized for image generation.\n\n\
             Guidelines:\n\
             - Focus on ONE key moment or action\n\
             - Keep the description under 200 words\n\
             - Use clear, specific visual language\n\
             - Prioritize action and emotion over complex details\n\
             - Stay visually consistent with the previous scene when nothing contradicts it\n\
             - If no clear action is described, create a simple portrait or scene of the \
             mentioned characters\n\n\
             Current Environment:\n{environment}\n\n\
             Style Directive:\n{style}\n\n\
             Previous Scene:\n{previous_scene}\n\n\
             Available Characters:\n{character_details}\n\n\
             Transcript:\n{transcript}\n\n\
             Generate a concise scene description, only including characters relevant to \
             this specific moment:",
            environment = request.environment,
            style = request.style,
            previous_scene = request.previous_scene,
            transcript = request.transcript,
        );

        let scene_text = self.chat(system, &user).await?;
        let character_names = referenced_character_names(&scene_text, request.characters);

        Ok(ComposedScene {
            scene_text,
            character_names,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, scene_text: &str) -> Result<ImagePayload, ServiceError> {
        let request = ImageRequest {
            model: self.config.image_model.clone(),
            prompt: scene_text.to_string(),
            n: 1,
            size: "1792x1024",
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.config.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let image = parsed.data.into_iter().next().ok_or(ServiceError::Empty)?;

        if let Some(b64) = image.b64_json {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64.as_bytes())
                .map_err(|e| ServiceError::Parse(e.to_string()))?;
            return Ok(ImagePayload::Bytes(bytes));
        }

        image.url.map(ImagePayload::Url).ok_or(ServiceError::Empty)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(ServiceError::Api { status, message })
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
}
