pub mod broadcast;
pub mod cache;
pub mod characters;
pub mod config;
pub mod context;
pub mod history;
pub mod http;
pub mod persist;
pub mod pipeline;
pub mod services;

pub use broadcast::{Broadcaster, Snapshot, Update};
pub use cache::{CachedImage, ImageCache};
pub use characters::{Character, CharacterStore};
pub use config::Config;
pub use context::{ContextStore, EnvironmentState, EnvironmentUpdate, ScenePrompt, StyleDirective};
pub use history::{SceneEvent, SessionHistory, SessionRecord, SessionSummary};
pub use http::{create_router, AppState};
pub use pipeline::{
    AudioSubmission, Coordinator, PipelineHandle, RunOutcome, RunReport, Services, Stage,
    SubmitError,
};
