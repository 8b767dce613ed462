use crate::persist::{read_json_or_default, write_json_atomic};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;

const DEFAULT_STYLE: &str = "Art style: fantasy oil painting. Color palette: vibrant and rich. \
    Lighting: dramatic with strong shadows and highlights. Composition: balanced and cinematic. \
    Level of detail: high with carefully rendered textures.";

/// User-controlled text fragment appended to every scene composition request
/// to bias the visual style of generated images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleDirective {
    pub text: String,
}

impl Default for StyleDirective {
    fn default() -> Self {
        Self {
            text: DEFAULT_STYLE.to_string(),
        }
    }
}

pub(super) struct StyleStore {
    path: PathBuf,
    state: RwLock<StyleDirective>,
}

impl StyleStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state: StyleDirective = read_json_or_default(&path)?;
        let state = if state.text.trim().is_empty() {
            StyleDirective::default()
        } else {
            state
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub async fn get(&self) -> StyleDirective {
        self.state.read().await.clone()
    }

    pub async fn set(&self, text: &str) -> Result<StyleDirective> {
        if text.trim().is_empty() {
            bail!("Style directive must not be empty");
        }

        let mut state = self.state.write().await;
        let next = StyleDirective {
            text: text.to_string(),
        };

        write_json_atomic(&self.path, &next)?;
        *state = next.clone();

        Ok(next)
    }

    /// Restore and persist the built-in default directive.
    pub async fn reset(&self) -> Result<StyleDirective> {
        let mut state = self.state.write().await;
        let next = StyleDirective::default();

        write_json_atomic(&self.path, &next)?;
        *state = next.clone();

        Ok(next)
    }
}
