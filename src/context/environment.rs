use crate::persist::{read_json_or_default, write_json_atomic};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

const DEFAULT_DESCRIPTION: &str = "A generic fantasy setting with no specific details yet.";

/// Current environment description plus the lock flag guarding it against
/// automatic overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub description: String,
    pub locked: bool,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            description: DEFAULT_DESCRIPTION.to_string(),
            locked: false,
        }
    }
}

/// Result of an environment write: the resulting state plus whether the
/// submitted description was actually applied (a locked store with no
/// explicit override leaves the description untouched).
#[derive(Debug, Clone)]
pub struct EnvironmentUpdate {
    pub state: EnvironmentState,
    pub applied: bool,
}

pub(super) struct EnvironmentStore {
    path: PathBuf,
    state: RwLock<EnvironmentState>,
}

impl EnvironmentStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = read_json_or_default(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub async fn get(&self) -> EnvironmentState {
        self.state.read().await.clone()
    }

    pub async fn is_locked(&self) -> bool {
        self.state.read().await.locked
    }

    /// Update the description and optionally the lock flag.
    ///
    /// The lock flag always follows an explicit override. The description is
    /// applied when the store is unlocked, or when any explicit override
    /// accompanies the call (a manual "edit + set lock" always lands); a
    /// locked store with no override keeps its description untouched.
    pub async fn update(
        &self,
        description: &str,
        locked: Option<bool>,
    ) -> Result<EnvironmentUpdate> {
        let mut state = self.state.write().await;

        let applied = !description.is_empty() && (!state.locked || locked.is_some());

        let mut next = state.clone();
        if applied {
            next.description = description.to_string();
        }
        if let Some(locked) = locked {
            next.locked = locked;
        }

        if state.locked && locked.is_none() {
            info!("Environment is locked, ignoring automatic update");
        }

        write_json_atomic(&self.path, &next)?;
        *state = next.clone();

        Ok(EnvironmentUpdate {
            state: next,
            applied,
        })
    }
}
