//! Batch orchestration with per-row fault isolation.
//!
//! Models are loaded once before the first row; every row then yields either
//! a result or a classified error, in input order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::service::{PerioRuntime, RuntimeState};
use super::types::{PredictionRequest, PredictionResult};
use crate::error::{Error, ErrorDetail, Result};
use crate::models::ModelHandle;

/// One input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    /// External id; positional (1-based) when absent.
    pub row_id: Option<String>,
    pub smiles: String,
    pub return_embedding: bool,
    /// Set when the input line could not be decoded; the row then fails
    /// validation without running.
    pub input_error: Option<String>,
}

impl BatchRow {
    pub fn new(row_id: Option<String>, smiles: impl Into<String>) -> Self {
        Self {
            row_id,
            smiles: smiles.into(),
            return_embedding: false,
            input_error: None,
        }
    }

    pub fn with_input_error(mut self, message: impl Into<String>) -> Self {
        self.input_error = Some(message.into());
        self
    }
}

/// Per-row result: success or a structured error.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    Success(PredictionResult),
    Failure(ErrorDetail),
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct BatchRowResult {
    pub row_id: String,
    pub smiles: String,
    pub property: String,
    pub request_id: String,
    pub outcome: RowOutcome,
}

impl BatchRowResult {
    fn failure(row_id: String, request: &PredictionRequest, detail: ErrorDetail) -> Self {
        Self {
            row_id,
            smiles: request.smiles.clone(),
            property: request.property.clone(),
            request_id: Uuid::new_v4().to_string(),
            outcome: RowOutcome::Failure(detail),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every row succeeded.
    Complete,
    /// Some rows failed.
    Partial,
    /// Nothing ran.
    Fatal,
}

impl BatchOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchOutcome::Complete => 0,
            BatchOutcome::Partial => 1,
            BatchOutcome::Fatal => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub results: Vec<BatchRowResult>,
    /// Set when the batch failed before any row ran.
    pub fatal: Option<ErrorDetail>,
}

impl BatchReport {
    fn fatal(err: &Error) -> Self {
        Self {
            outcome: BatchOutcome::Fatal,
            results: Vec::new(),
            fatal: Some(err.detail()),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

pub struct BatchOrchestrator<'a> {
    runtime: &'a PerioRuntime,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(runtime: &'a PerioRuntime) -> Self {
        Self { runtime }
    }

    /// Run every row against one property.
    pub async fn run_batch(&self, rows: &[BatchRow], property: &str) -> BatchReport {
        let (state, model) = match self.prepare(property, rows).await {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!("Batch aborted before any row ran: {}", err);
                return BatchReport::fatal(&err);
            }
        };

        let mut results = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let row_id = row
                .row_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| (i + 1).to_string());
            let request = PredictionRequest {
                smiles: row.smiles.clone(),
                property: property.to_string(),
                return_embedding: row.return_embedding,
            };
            let result = match &row.input_error {
                Some(message) => BatchRowResult::failure(
                    row_id,
                    &request,
                    Error::Validation(message.clone()).detail(),
                ),
                None => self.run_row(&state, &model, row_id, &request).await,
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
        info!(
            "Batch finished: {} rows, {} failed",
            results.len(),
            failed
        );
        BatchReport {
            outcome: if failed == 0 {
                BatchOutcome::Complete
            } else {
                BatchOutcome::Partial
            },
            results,
            fatal: None,
        }
    }

    async fn prepare(
        &self,
        property: &str,
        rows: &[BatchRow],
    ) -> Result<(Arc<RuntimeState>, Arc<ModelHandle>)> {
        let state = self.runtime.state().await?;
        PerioRuntime::check_property(&state, property)?;
        let model = state.registry.get_property_model(property).await?;
        if rows.iter().any(|r| r.return_embedding) {
            state.registry.get_embedding_model().await?;
        }
        Ok((state, model))
    }

    async fn run_row(
        &self,
        state: &RuntimeState,
        model: &Arc<ModelHandle>,
        row_id: String,
        request: &PredictionRequest,
    ) -> BatchRowResult {
        let request_id = Uuid::new_v4().to_string();
        let outcome = match self.predict_row(state, model, request, &request_id).await {
            Ok(result) => RowOutcome::Success(result),
            Err(err) => RowOutcome::Failure(err.detail()),
        };
        BatchRowResult {
            row_id,
            smiles: request.smiles.clone(),
            property: request.property.clone(),
            request_id,
            outcome,
        }
    }

    async fn predict_row(
        &self,
        state: &RuntimeState,
        model: &Arc<ModelHandle>,
        request: &PredictionRequest,
        request_id: &str,
    ) -> Result<PredictionResult> {
        let features = state.preprocessor.preprocess(&request.smiles)?;
        self.runtime
            .predict_loaded(state, model.clone(), features, request, request_id)
            .await
    }

    /// Run independent requests that may name different properties.
    ///
    /// Each distinct property is loaded once up front; a property that cannot
    /// be loaded fails only the items that asked for it.
    pub async fn run_items(
        &self,
        items: &[PredictionRequest],
    ) -> Result<Vec<BatchRowResult>> {
        let state = self.runtime.state().await?;

        let properties: BTreeSet<&str> = items.iter().map(|r| r.property.as_str()).collect();
        let mut models: BTreeMap<&str, std::result::Result<Arc<ModelHandle>, ErrorDetail>> =
            BTreeMap::new();
        for property in properties {
            let loaded = match PerioRuntime::check_property(&state, property) {
                Ok(()) => state
                    .registry
                    .get_property_model(property)
                    .await
                    .map_err(|e| e.detail()),
                Err(e) => Err(e.detail()),
            };
            models.insert(property, loaded);
        }

        let mut results = Vec::with_capacity(items.len());
        for (i, request) in items.iter().enumerate() {
            let row_id = (i + 1).to_string();
            let result = match models.get(request.property.as_str()) {
                Some(Ok(model)) => self.run_row(&state, model, row_id, request).await,
                other => {
                    let detail = match other {
                        Some(Err(detail)) => detail.clone(),
                        _ => Error::Inference(format!(
                            "model for '{}' was not prepared",
                            request.property
                        ))
                        .detail(),
                    };
                    BatchRowResult::failure(row_id, request, detail)
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolveOptions, RuntimeConfig};
    use crate::error::ErrorCode;
    use crate::models::StaticGpuProbe;
    use crate::testing::ArtifactFixture;

    fn runtime(fixture: &ArtifactFixture) -> PerioRuntime {
        let config = RuntimeConfig::resolve(
            &fixture.config_inputs(),
            ResolveOptions::strict(),
            &StaticGpuProbe::default(),
        )
        .unwrap();
        PerioRuntime::new(config)
    }

    fn failure_code(result: &BatchRowResult) -> Option<ErrorCode> {
        match &result.outcome {
            RowOutcome::Failure(detail) => Some(detail.code),
            RowOutcome::Success(_) => None,
        }
    }

    #[tokio::test]
    async fn test_bad_row_does_not_abort_batch() {
        let fixture = ArtifactFixture::new(&["eps"]);
        let rt = runtime(&fixture);
        let rows = vec![
            BatchRow::new(Some("a".into()), "*CC*"),
            BatchRow::new(None, "not-a-structure"),
        ];

        let report = BatchOrchestrator::new(&rt).run_batch(&rows, "eps").await;
        assert_eq!(report.outcome, BatchOutcome::Partial);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].row_id, "a");
        assert!(report.results[0].outcome.is_success());
        assert_eq!(report.results[1].row_id, "2");
        assert_eq!(failure_code(&report.results[1]), Some(ErrorCode::ValidationError));
        assert_ne!(report.results[0].request_id, report.results[1].request_id);
    }

    #[tokio::test]
    async fn test_undecodable_row_fails_alone() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let rt = runtime(&fixture);
        let rows = vec![
            BatchRow::new(None, "*CC*"),
            BatchRow::new(None, "*C\u{FFFD}C*").with_input_error("Row 2 is not valid UTF-8"),
            BatchRow::new(None, "*OCCO*"),
        ];

        let report = BatchOrchestrator::new(&rt).run_batch(&rows, "tg").await;
        assert_eq!(report.outcome, BatchOutcome::Partial);
        assert!(report.results[0].outcome.is_success());
        assert_eq!(failure_code(&report.results[1]), Some(ErrorCode::ValidationError));
        assert!(report.results[2].outcome.is_success());
        match &report.results[1].outcome {
            RowOutcome::Failure(detail) => assert!(detail.message.contains("UTF-8")),
            RowOutcome::Success(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_models_load_once_per_batch() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let rt = runtime(&fixture);
        let rows: Vec<BatchRow> = ["*CC*", "*CC(C)*", "*OCCO*", "*C*"]
            .iter()
            .map(|s| BatchRow::new(None, *s))
            .collect();

        let report = BatchOrchestrator::new(&rt).run_batch(&rows, "tg").await;
        assert_eq!(report.outcome, BatchOutcome::Complete);
        assert_eq!(report.succeeded(), 4);
        let state = rt.state().await.unwrap();
        assert_eq!(state.registry.weight_loads(), 2);

        let ids: Vec<_> = report.results.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_fatal_before_rows() {
        let fixture = ArtifactFixture::new(&["tg"]);
        std::fs::remove_file(fixture.layout().index()).unwrap();
        let rt = runtime(&fixture);

        let report = BatchOrchestrator::new(&rt)
            .run_batch(&[BatchRow::new(None, "*CC*")], "tg")
            .await;
        assert_eq!(report.outcome, BatchOutcome::Fatal);
        assert_eq!(report.exit_code(), 2);
        assert!(report.results.is_empty());
        assert_eq!(report.fatal.unwrap().code, ErrorCode::CheckpointMissing);
    }

    #[tokio::test]
    async fn test_run_items_isolates_unknown_properties() {
        let fixture = ArtifactFixture::new(&["tg", "eps"]);
        let rt = runtime(&fixture);
        let items = vec![
            PredictionRequest::new("*CC*", "tg"),
            PredictionRequest::new("*CC*", "nope"),
            PredictionRequest::new("*CC*", "eps"),
        ];

        let results = BatchOrchestrator::new(&rt).run_items(&items).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_success());
        assert_eq!(failure_code(&results[1]), Some(ErrorCode::UnsupportedProperty));
        assert!(results[2].outcome.is_success());
    }
}
