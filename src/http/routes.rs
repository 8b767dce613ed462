use super::handlers;
use super::state::AppState;
use super::ws;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let max_upload = state.max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Audio ingestion
        .route("/upload_audio", post(handlers::upload_audio))
        // Environment
        .route(
            "/environment",
            get(handlers::get_environment).post(handlers::save_environment),
        )
        // Style directive
        .route("/style", get(handlers::get_style).post(handlers::save_style))
        .route("/style/reset", post(handlers::reset_style))
        // Scene prompt
        .route(
            "/scene_prompt",
            get(handlers::get_scene_prompt).delete(handlers::clear_scene_prompt),
        )
        // Session history
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:session_id", get(handlers::get_session))
        // Image serving
        .route("/scene_images/:filename", get(handlers::serve_scene_image))
        .route(
            "/session_images/:session_id/:filename",
            get(handlers::serve_session_image),
        )
        // Character registry
        .route("/characters", get(handlers::get_characters))
        .route(
            "/characters/:character_id",
            get(handlers::get_character)
                .post(handlers::save_character)
                .delete(handlers::delete_character),
        )
        // Live viewer updates
        .route("/updates", get(ws::updates_ws))
        // Audio chunks can be large; raise the default body limit
        .layer(DefaultBodyLimit::max(max_upload))
        // Browser viewers connect cross-origin during development
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
