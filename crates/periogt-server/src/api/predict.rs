//! Prediction endpoints (single and batch)

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use periogt_core::{
    BatchOrchestrator, ErrorDetail, PredictionRequest, PredictionResponse, RowOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::request_id;
use crate::error::ApiError;
use crate::state::AppState;

pub const MAX_BATCH_ITEMS: usize = 100;

pub async fn predict(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let request_id = request_id(&headers);
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text(), &request_id))?;
    debug!("Predict request {}: {} for {}", request_id, req.property, req.smiles);

    let _permit = state.acquire_permit(&request_id).await?;
    let result = state
        .runtime
        .predict(&req, &request_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;
    Ok(Json(result.to_response()))
}

#[derive(Debug, Deserialize)]
pub struct BatchPredictRequest {
    pub items: Vec<PredictionRequest>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Prediction(PredictionResponse),
    Error(ErrorDetail),
}

#[derive(Debug, Serialize)]
pub struct BatchPredictResponse {
    pub results: Vec<BatchItem>,
    pub request_id: String,
}

pub async fn predict_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BatchPredictRequest>, JsonRejection>,
) -> Result<Json<BatchPredictResponse>, ApiError> {
    let request_id = request_id(&headers);
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text(), &request_id))?;
    if req.items.is_empty() || req.items.len() > MAX_BATCH_ITEMS {
        return Err(ApiError::validation(
            format!(
                "Batch must contain between 1 and {MAX_BATCH_ITEMS} items (got {}).",
                req.items.len()
            ),
            &request_id,
        ));
    }

    let _permit = state.acquire_permit(&request_id).await?;
    let rows = BatchOrchestrator::new(&state.runtime)
        .run_items(&req.items)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    let results: Vec<BatchItem> = rows
        .into_iter()
        .map(|row| match row.outcome {
            RowOutcome::Success(result) => BatchItem::Prediction(result.to_response()),
            RowOutcome::Failure(mut detail) => {
                detail.details = Some(with_item_context(detail.details, &row.smiles, &row.property));
                BatchItem::Error(detail)
            }
        })
        .collect();
    info!("Batch {} finished with {} items", request_id, results.len());

    Ok(Json(BatchPredictResponse {
        results,
        request_id,
    }))
}

fn with_item_context(details: Option<Value>, smiles: &str, property: &str) -> Value {
    let mut context = match details {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    context.insert("smiles".to_string(), json!(smiles));
    context.insert("property".to_string(), json!(property));
    Value::Object(context)
}
