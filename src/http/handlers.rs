use super::state::AppState;
use crate::characters::Character;
use crate::pipeline::{AudioSubmission, SubmitError};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SaveEnvironmentRequest {
    pub description: String,

    /// Optional lock override; when present it always updates the lock flag
    pub locked: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SaveStyleRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveCharacterRequest {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScenePromptResponse {
    pub prompt: String,
    pub generated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> axum::response::Response {
    error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{}: {}", context, e),
        }),
    )
        .into_response()
}

// ============================================================================
// Audio submission
// ============================================================================

/// POST /upload_audio
/// Accept one audio chunk for processing; the result arrives asynchronously
/// via the broadcaster.
pub async fn upload_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut submission: Option<AudioSubmission> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Malformed multipart body: {}", e),
                    }),
                )
                    .into_response();
            }
        };

        if field.name() != Some("audio") {
            continue;
        }

        let filename = field
            .file_name()
            .unwrap_or("chunk.wav")
            .to_string();

        match field.bytes().await {
            Ok(bytes) => {
                submission = Some(AudioSubmission {
                    bytes: bytes.to_vec(),
                    filename,
                });
                break;
            }
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Failed to read audio field: {}", e),
                    }),
                )
                    .into_response();
            }
        }
    }

    let Some(submission) = submission else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Missing audio file".to_string(),
            }),
        )
            .into_response();
    };

    info!(
        "Received audio chunk: {} ({} bytes)",
        submission.filename,
        submission.bytes.len()
    );

    match state.pipeline.submit(submission) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                status: "accepted".to_string(),
                message: "Audio queued for processing".to_string(),
            }),
        )
            .into_response(),
        Err(SubmitError::Rejected(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: reason }),
        )
            .into_response(),
        Err(e @ (SubmitError::QueueFull | SubmitError::Closed)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ============================================================================
// Environment
// ============================================================================

/// GET /environment
pub async fn get_environment(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.context.environment().await)
}

/// POST /environment
/// Manual edit of the description and lock flag; broadcast to viewers.
pub async fn save_environment(
    State(state): State<AppState>,
    Json(req): Json<SaveEnvironmentRequest>,
) -> impl IntoResponse {
    match state
        .context
        .set_environment(&req.description, req.locked)
        .await
    {
        Ok(updated) => {
            if updated.applied {
                state
                    .broadcaster
                    .publish_environment(&updated.state.description);
            }
            Json(updated.state).into_response()
        }
        Err(e) => internal_error("Failed to save environment", format!("{:#}", e)),
    }
}

// ============================================================================
// Style
// ============================================================================

/// GET /style
pub async fn get_style(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.context.style().await)
}

/// POST /style
pub async fn save_style(
    State(state): State<AppState>,
    Json(req): Json<SaveStyleRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Style text is required".to_string(),
            }),
        )
            .into_response();
    }

    match state.context.set_style(&req.text).await {
        Ok(updated) => {
            state.broadcaster.publish_style(&updated.text);
            Json(updated).into_response()
        }
        Err(e) => internal_error("Failed to save style", format!("{:#}", e)),
    }
}

/// POST /style/reset
pub async fn reset_style(State(state): State<AppState>) -> impl IntoResponse {
    match state.context.reset_style().await {
        Ok(updated) => {
            state.broadcaster.publish_style(&updated.text);
            Json(updated).into_response()
        }
        Err(e) => internal_error("Failed to reset style", format!("{:#}", e)),
    }
}

// ============================================================================
// Scene prompt
// ============================================================================

/// GET /scene_prompt
pub async fn get_scene_prompt(State(state): State<AppState>) -> impl IntoResponse {
    let prompt = state.context.last_scene_prompt().await;
    Json(ScenePromptResponse {
        prompt: prompt.last_text,
        generated_at: prompt.generated_at,
    })
}

/// DELETE /scene_prompt
/// Clears the continuity prompt only; recorded history is untouched.
pub async fn clear_scene_prompt(State(state): State<AppState>) -> impl IntoResponse {
    match state.context.clear_last_scene_prompt().await {
        Ok(_) => {
            state.broadcaster.publish_scene("");
            Json(ClearedResponse {
                success: true,
                message: "Scene prompt cleared successfully".to_string(),
            })
            .into_response()
        }
        Err(e) => internal_error("Failed to clear scene prompt", format!("{:#}", e)),
    }
}

// ============================================================================
// Session history
// ============================================================================

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.history.list_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => internal_error("Failed to list sessions", format!("{:#}", e)),
    }
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.history.get_session(&session_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
        Err(e) => internal_error("Failed to read session", format!("{:#}", e)),
    }
}

// ============================================================================
// Image serving
// ============================================================================

/// GET /scene_images/:filename
pub async fn serve_scene_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    let Some(path) = state.cache.resolve(&filename) else {
        return (StatusCode::NOT_FOUND, "Image not found").into_response();
    };
    serve_png(&path).await
}

/// GET /session_images/:session_id/:filename
pub async fn serve_session_image(
    State(state): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(path) = state.history.resolve_image(&session_id, &filename) else {
        return (StatusCode::NOT_FOUND, "Image not found").into_response();
    };
    serve_png(&path).await
}

async fn serve_png(path: &std::path::Path) -> axum::response::Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => {
            error!("Failed to read image {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, "Image not found").into_response()
        }
    }
}

// ============================================================================
// Characters
// ============================================================================

/// GET /characters
pub async fn get_characters(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.characters.list().await)
}

/// GET /characters/:character_id
pub async fn get_character(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
) -> impl IntoResponse {
    match state.characters.get(&character_id).await {
        Some(character) => Json(character).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Character not found".to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /characters/:character_id
pub async fn save_character(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    Json(req): Json<SaveCharacterRequest>,
) -> impl IntoResponse {
    if req.name.trim().is_empty() || req.description.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Name and description are required".to_string(),
            }),
        )
            .into_response();
    }

    let character = Character {
        name: req.name,
        description: req.description,
    };

    match state.characters.upsert(&character_id, character).await {
        Ok(()) => Json(state.characters.list().await).into_response(),
        Err(e) => internal_error("Failed to save character", format!("{:#}", e)),
    }
}

/// DELETE /characters/:character_id
pub async fn delete_character(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
) -> impl IntoResponse {
    match state.characters.remove(&character_id).await {
        Ok(true) => Json(ClearedResponse {
            success: true,
            message: "Character deleted successfully".to_string(),
        })
        .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Character not found".to_string(),
            }),
        )
            .into_response(),
        Err(e) => internal_error("Failed to delete character", format!("{:#}", e)),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
