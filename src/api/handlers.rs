use axum::{extract::State, Json};
use tracing::{error, info};

use crate::api::{
    error::ApiError,
    types::{ChatRequest, ChatResponse, HealthResponse},
    AppState,
};

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(chars = req.message.chars().count(), "received /chat request");

    let response = state
        .infer
        .generate_reply(&req.message)
        .await
        .map_err(|err| {
            error!(error = %format!("{err:#}"), "generation failed");
            ApiError::Generation(err)
        })?;

    info!(chars = response.chars().count(), "response generated");
    Ok(Json(ChatResponse { response }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.model_id.clone(),
        device: state.device.clone(),
    })
}
