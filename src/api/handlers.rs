//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, EngineResponse, ErrorResponse, GenerateImageRequest, GenerateImageResponse,
};
use super::{AppState, LeasedTurn};
use crate::media::{enhance_prompt, MediaError, MediaRequest};
use crate::session::ConverseError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversation turns, streamed as SSE
        .route("/api/chat", post(send_chat))
        .route("/api/chat/:id/cancel", post(cancel_turn))
        // Engine status
        .route("/api/engine", get(get_engine))
        .route("/api/engine/reprobe", post(reprobe_engine))
        // Direct media generation
        .route("/api/generate-image", post(generate_image))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversation Turns
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let conversation_id = req
        .conversation_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = state.conversation(&conversation_id).await;

    let turn = match session.converse(req.messages, CancellationToken::new()) {
        Ok(turn) => turn,
        Err(e) => {
            tracing::info!(conversation_id = %conversation_id, error = %e, "Turn rejected");
            state.release_when_idle(conversation_id, session);
            return Err(AppError::from(e));
        }
    };

    tracing::debug!(conversation_id = %conversation_id, "Streaming turn");
    let leased = LeasedTurn {
        turn,
        state,
        conversation_id: conversation_id.clone(),
        session: Some(session),
    };
    Ok(sse_stream(conversation_id, leased).into_response())
}

async fn cancel_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session = state
        .existing_conversation(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No turn in flight for conversation {id}")))?;
    let running = session.cancel();
    state.release_when_idle(id, session);
    if running {
        Ok(StatusCode::ACCEPTED)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

// ============================================================
// Engine Status
// ============================================================

async fn get_engine(State(state): State<AppState>) -> Json<EngineResponse> {
    Json(engine_response(&state).await)
}

async fn reprobe_engine(State(state): State<AppState>) -> Json<EngineResponse> {
    let new_state = state.orchestrator.reprobe().await;
    tracing::info!(state = new_state.as_str(), "Engine re-probed on request");
    Json(engine_response(&state).await)
}

async fn engine_response(state: &AppState) -> EngineResponse {
    EngineResponse {
        state: state.orchestrator.engine_state().await,
        progress: *state.orchestrator.progress().borrow(),
        tools: state.orchestrator.enabled_tools().to_vec(),
    }
}

// ============================================================
// Media
// ============================================================

async fn generate_image(
    State(state): State<AppState>,
    Json(req): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, AppError> {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::BadRequest("Prompt required".to_string()));
    }

    let request = MediaRequest::image(prompt, req.style);
    let image_url = state
        .orchestrator
        .generate_media(&request)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Image generation failed");
            AppError::from(e)
        })?;

    Ok(Json(GenerateImageResponse {
        image_url,
        prompt: enhance_prompt(prompt, req.style),
    }))
}

async fn get_version() -> &'static str {
    concat!("hybrid-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub(super) enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ConverseError> for AppError {
    fn from(e: ConverseError) -> Self {
        match e {
            ConverseError::InvalidConversation(_) => AppError::BadRequest(e.to_string()),
            ConverseError::TurnInProgress => AppError::Conflict(e.to_string()),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
