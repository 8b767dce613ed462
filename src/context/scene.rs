use crate::persist::{read_json_or_default, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// The most recently emitted scene description, kept as continuity context
/// for the next composition run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenePrompt {
    pub last_text: String,
    pub generated_at: Option<DateTime<Utc>>,
}

pub(super) struct SceneStore {
    path: PathBuf,
    state: RwLock<ScenePrompt>,
}

impl SceneStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = read_json_or_default(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub async fn get(&self) -> ScenePrompt {
        self.state.read().await.clone()
    }

    pub async fn set(&self, text: &str) -> Result<ScenePrompt> {
        let mut state = self.state.write().await;
        let next = ScenePrompt {
            last_text: text.to_string(),
            generated_at: Some(Utc::now()),
        };

        write_json_atomic(&self.path, &next)?;
        *state = next.clone();

        Ok(next)
    }

    /// Clear the continuity prompt. Recorded session history is untouched.
    pub async fn clear(&self) -> Result<ScenePrompt> {
        let mut state = self.state.write().await;
        let next = ScenePrompt::default();

        write_json_atomic(&self.path, &next)?;
        *state = next.clone();

        Ok(next)
    }
}
