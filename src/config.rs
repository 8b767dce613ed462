use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for context, character and cache data
    pub data_dir: PathBuf,

    /// Directory for session logs and archived images
    pub history_dir: PathBuf,
}

impl StorageConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("scene_cache")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of images kept in the scene cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Maximum accepted audio upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Queued submissions beyond the active run before uploads are rejected
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_transcribe_timeout")]
    pub transcribe_timeout_secs: u64,

    #[serde(default = "default_analyze_timeout")]
    pub analyze_timeout_secs: u64,

    #[serde(default = "default_compose_timeout")]
    pub compose_timeout_secs: u64,

    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.transcribe_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }

    pub fn compose_timeout(&self) -> Duration {
        Duration::from_secs(self.compose_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,
}

fn default_cache_capacity() -> usize {
    10
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_queue_depth() -> usize {
    32
}

fn default_transcribe_timeout() -> u64 {
    60
}

fn default_analyze_timeout() -> u64 {
    30
}

fn default_compose_timeout() -> u64 {
    45
}

fn default_image_timeout() -> u64 {
    120
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_transcribe_model() -> String {
    "whisper-1".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ADVENTURE_ART").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
