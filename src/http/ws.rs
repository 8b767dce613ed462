use super::state::AppState;
use crate::broadcast::Update;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// GET /updates
/// Live update stream for viewers. On connect the latest known state is
/// replayed to this socket only; afterwards every published update is
/// forwarded until the viewer disconnects.
pub async fn updates_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("Viewer connected");

    // Subscribe before the replay so updates published in between are not lost.
    let mut updates = state.broadcaster.subscribe();
    let (mut sink, mut stream) = socket.split();

    for update in state.snapshot().await.into_updates() {
        if send_update(&mut sink, &update).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    if send_update(&mut sink, &update).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Dropped events are not replayed; the viewer catches up
                    // from the next update onward.
                    warn!("Viewer lagged, {} updates dropped", missed);
                }
                Err(RecvError::Closed) => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Viewers only listen; other inbound frames are ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Viewer disconnected");
}

async fn send_update(
    sink: &mut SplitSink<WebSocket, Message>,
    update: &Update,
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(update) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize update: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(payload)).await
}
