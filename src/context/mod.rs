//! Session-wide mutable context shared between pipeline runs and manual
//! edits: the environment description (with its lock flag), the style
//! directive, and the last emitted scene prompt.
//!
//! The three pieces are independently locked and independently persisted, so
//! a style edit never blocks on an in-flight environment update. Every write
//! persists before the in-memory value changes; a failed write leaves no
//! phantom state behind.

mod environment;
mod scene;
mod style;

pub use environment::{EnvironmentState, EnvironmentUpdate};
pub use scene::ScenePrompt;
pub use style::StyleDirective;

use anyhow::{Context, Result};
use std::path::Path;

pub struct ContextStore {
    environment: environment::EnvironmentStore,
    style: style::StyleStore,
    scene: scene::SceneStore,
}

impl ContextStore {
    /// Open (or initialize) the context store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        Ok(Self {
            environment: environment::EnvironmentStore::open(data_dir.join("environment.json"))?,
            style: style::StyleStore::open(data_dir.join("style_data.json"))?,
            scene: scene::SceneStore::open(data_dir.join("scene_data.json"))?,
        })
    }

    pub async fn environment(&self) -> EnvironmentState {
        self.environment.get().await
    }

    pub async fn is_environment_locked(&self) -> bool {
        self.environment.is_locked().await
    }

    /// Replace the environment description, optionally overriding the lock
    /// flag. Automatic pipeline updates pass `locked = None` and are ignored
    /// while the environment is locked; the returned update says whether the
    /// description actually landed.
    pub async fn set_environment(
        &self,
        description: &str,
        locked: Option<bool>,
    ) -> Result<EnvironmentUpdate> {
        self.environment.update(description, locked).await
    }

    pub async fn style(&self) -> StyleDirective {
        self.style.get().await
    }

    pub async fn set_style(&self, text: &str) -> Result<StyleDirective> {
        self.style.set(text).await
    }

    pub async fn reset_style(&self) -> Result<StyleDirective> {
        self.style.reset().await
    }

    pub async fn last_scene_prompt(&self) -> ScenePrompt {
        self.scene.get().await
    }

    pub async fn set_last_scene_prompt(&self, text: &str) -> Result<ScenePrompt> {
        self.scene.set(text).await
    }

    pub async fn clear_last_scene_prompt(&self) -> Result<ScenePrompt> {
        self.scene.clear().await
    }
}
