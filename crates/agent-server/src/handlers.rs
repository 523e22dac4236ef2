//! HTTP Handlers

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct QuestionInput {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Process a single question and return the final answer
pub async fn invoke(
    State(state): State<AppState>,
    Json(input): Json<QuestionInput>,
) -> Result<Json<InvokeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let result = state.agent.run(&input.question).await.map_err(|e| {
        tracing::error!("agent error: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                detail: e.user_message(),
            }),
        )
    })?;

    Ok(Json(InvokeResponse { result }))
}

/// Process a single question as a server-sent-event stream, one event per
/// intermediate fragment, closing after the final answer
pub async fn invoke_streaming(
    State(state): State<AppState>,
    Json(input): Json<QuestionInput>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let fragments = state.agent.run_stream(&input.question);
    Sse::new(fragments.map(|fragment| Ok(Event::default().data(fragment))))
}
