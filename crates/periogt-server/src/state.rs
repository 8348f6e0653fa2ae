//! Shared application state with a fixed concurrency ceiling

use std::sync::Arc;

use periogt_core::PerioRuntime;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::ApiError;

pub const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<PerioRuntime>,
    /// Bounds in-flight inference requests per process.
    pub request_semaphore: Arc<Semaphore>,
    pub max_concurrent: usize,
    /// When set, every endpoint except health requires `X-Api-Key`.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(runtime: Arc<PerioRuntime>, max_concurrent: usize, api_key: Option<String>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            runtime,
            request_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn from_env(runtime: Arc<PerioRuntime>) -> Self {
        let max_concurrent = std::env::var("PERIOGT_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT);
        let api_key = std::env::var("PERIOGT_API_KEY").ok();
        Self::new(runtime, max_concurrent, api_key)
    }

    /// Acquire a permit for one inference request.
    pub async fn acquire_permit(&self, request_id: &str) -> Result<SemaphorePermit<'_>, ApiError> {
        self.request_semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::internal("Request limiter closed", request_id))
    }
}
