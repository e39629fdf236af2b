use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, post},
    Json, Router,
};
use futures_core::Stream;
use serde_json::json;
use tokio_stream::StreamExt;
use uuid::Uuid;

use tabletalk_core::ChatEvent;
use tabletalk_schema::{ChatRequest, ChatResponse};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat))
        .route("/stream", post(chat_stream))
        .route("/session/{id}", delete(clear_session))
}

fn resolve_session_id(requested: Option<String>) -> String {
    requested.unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Send a message, receive the complete answer.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<serde_json::Value>)> {
    let session_id = resolve_session_id(request.session_id);
    match state.engine.chat(&request.message, &session_id).await {
        Ok(answer) => Ok(Json(ChatResponse { answer, session_id })),
        Err(e) => {
            tracing::error!("chat exchange failed: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "failed to process message" })),
            ))
        }
    }
}

/// Send a message, receive the answer as SSE token events followed by a
/// terminal `done` or `error` event.
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = resolve_session_id(request.session_id);
    let mut events = state.engine.chat_stream(request.message, session_id);

    let stream = async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(ChatEvent::Token(token)) => {
                    yield Ok(Event::default().data(json!({ "token": token }).to_string()));
                }
                Ok(ChatEvent::Done { session_id }) => {
                    yield Ok(Event::default()
                        .event("done")
                        .data(json!({ "session_id": session_id }).to_string()));
                }
                Err(e) => {
                    tracing::error!("chat stream failed: {e:#}");
                    yield Ok(Event::default()
                        .event("error")
                        .data(json!({ "error": e.to_string() }).to_string()));
                    return;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Clear a session's history. Succeeds whether or not the session existed.
async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    state.engine.sessions().clear(&id).await;
    Json(json!({ "message": "session cleared" }))
}
