//! Embedding endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use periogt_core::EmbeddingResult;
use serde::Deserialize;
use tracing::debug;

use super::request_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    pub smiles: String,
}

pub async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResult>, ApiError> {
    let request_id = request_id(&headers);
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text(), &request_id))?;
    debug!("Embedding request {} for {}", request_id, req.smiles);

    let _permit = state.acquire_permit(&request_id).await?;
    let result = state
        .runtime
        .embed(&req.smiles, &request_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;
    Ok(Json(result))
}
