//! Fan-out of externally visible state changes to connected viewers.
//!
//! Delivery is at-most-once per connected viewer; viewers that are
//! disconnected (or lag far enough behind to be dropped by the channel)
//! recover only through the snapshot replay performed on reconnect.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// One externally visible state change, serialized as-is onto viewer sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    NewImage { image_url: String },
    ScenePrompt { prompt: String },
    Environment { description: String },
    Style { directive: String },
}

/// Latest known state, replayed to a newly connecting viewer only.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub image_url: Option<String>,
    pub environment: String,
    pub scene_prompt: String,
}

impl Snapshot {
    /// The replay sequence for one new subscriber, in the order the live
    /// display expects: image first, then environment, then scene prompt.
    pub fn into_updates(self) -> Vec<Update> {
        let mut updates = Vec::new();
        if let Some(image_url) = self.image_url {
            updates.push(Update::NewImage { image_url });
        }
        updates.push(Update::Environment {
            description: self.environment,
        });
        if !self.scene_prompt.is_empty() {
            updates.push(Update::ScenePrompt {
                prompt: self.scene_prompt,
            });
        }
        updates
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Update>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_image(&self, image_url: &str) {
        self.publish(Update::NewImage {
            image_url: image_url.to_string(),
        });
    }

    pub fn publish_scene(&self, prompt: &str) {
        self.publish(Update::ScenePrompt {
            prompt: prompt.to_string(),
        });
    }

    pub fn publish_environment(&self, description: &str) {
        self.publish(Update::Environment {
            description: description.to_string(),
        });
    }

    pub fn publish_style(&self, directive: &str) {
        self.publish(Update::Style {
            directive: directive.to_string(),
        });
    }

    fn publish(&self, update: Update) {
        // A send error only means no viewer is currently connected.
        if self.tx.send(update).is_err() {
            debug!("No connected viewers, update dropped");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
