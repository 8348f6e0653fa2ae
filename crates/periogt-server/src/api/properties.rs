use axum::{extract::State, http::HeaderMap, Json};
use periogt_core::PropertyInfo;
use serde::Serialize;

use super::request_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PropertiesResponse {
    pub properties: Vec<PropertyInfo>,
}

pub async fn list_properties(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PropertiesResponse>, ApiError> {
    let request_id = request_id(&headers);
    let properties = state
        .runtime
        .list_properties()
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;
    Ok(Json(PropertiesResponse { properties }))
}
